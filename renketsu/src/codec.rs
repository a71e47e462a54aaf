//! ビットストリームの書き込みユーティリティ
//!
//! このモジュールは、トライ各レベルのビットマスク列や長さプレフィックスを
//! シリアライズするための小さなビットライターを提供します。
//! ビットはバイト内でLSBファーストに詰められ、出力は32ビット境界に
//! ゼロパディングできます。

/// スクラッチワードにビットをバッファリングするライター
///
/// 完成した8ビットごとに1バイトを出力列へ押し出します。
/// `into_bytes`の呼び出し時に未満バイトはゼロ埋めでフラッシュされます。
#[derive(Default)]
pub struct BitStreamWriter {
    bytes: Vec<u8>,
    scratch: u32,
    nbits: u32,
}

impl BitStreamWriter {
    /// 新しい空のライターを作成します。
    pub const fn new() -> Self {
        Self {
            bytes: vec![],
            scratch: 0,
            nbits: 0,
        }
    }

    /// 1ビットを追加します。
    #[inline]
    pub fn push_bit(&mut self, bit: bool) {
        self.push_bits(u32::from(bit), 1);
    }

    /// `value`の下位`nbits`ビットをLSBファーストで追加します。
    ///
    /// # 引数
    ///
    /// * `value` - 書き込む値
    /// * `nbits` - 書き込むビット数 (0..=24)
    #[inline]
    pub fn push_bits(&mut self, value: u32, nbits: u32) {
        debug_assert!(nbits <= 24);
        let mask = (1u32 << nbits) - 1;
        self.scratch |= (value & mask) << self.nbits;
        self.nbits += nbits;
        while self.nbits >= 8 {
            self.bytes.push((self.scratch & 0xFF) as u8);
            self.scratch >>= 8;
            self.nbits -= 8;
        }
    }

    /// 1バイトを追加します。
    #[inline]
    pub fn push_byte(&mut self, byte: u8) {
        self.push_bits(u32::from(byte), 8);
    }

    /// 書きかけのバイトをゼロ埋めで確定し、出力長が4バイトの倍数に
    /// なるまでゼロバイトを追加します。
    pub fn pad_to_word(&mut self) {
        if self.nbits != 0 {
            self.bytes.push((self.scratch & 0xFF) as u8);
            self.scratch = 0;
            self.nbits = 0;
        }
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
    }

    /// これまでに確定したバイト数を返します。
    ///
    /// スクラッチワード内の書きかけビットは含まれません。
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// 確定済みバイトが存在しない場合に`true`を返します。
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// ライターを消費してバイト列を取り出します。
    ///
    /// 書きかけのバイトが残っている場合はゼロ埋めでフラッシュされます。
    pub fn into_bytes(mut self) -> Vec<u8> {
        if self.nbits != 0 {
            self.bytes.push((self.scratch & 0xFF) as u8);
        }
        self.bytes
    }
}

/// `u16`をリトルエンディアンで追加します。
#[inline]
pub fn put_u16_le(buf: &mut Vec<u8>, x: u16) {
    buf.extend_from_slice(&x.to_le_bytes());
}

/// `i16`をリトルエンディアンで追加します。
#[inline]
pub fn put_i16_le(buf: &mut Vec<u8>, x: i16) {
    buf.extend_from_slice(&x.to_le_bytes());
}

/// `i32`をリトルエンディアンで追加します。
#[inline]
pub fn put_i32_le(buf: &mut Vec<u8>, x: i32) {
    buf.extend_from_slice(&x.to_le_bytes());
}
