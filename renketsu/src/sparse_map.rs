//! 簡潔ビットマスクトライによる疎マップ
//!
//! このモジュールは、疎な32ビットキーから小さな整数値への写像を
//! 固定深度のビットマスクトライとしてエンコードするコーデックを提供します。
//! 各レベルはノードごとに1バイトの子存在マスクを持ち、レベル内の
//! ビット列に対するrank演算だけでポインタなしに降下できます。
//! 参照コストはレベル数に比例し、表の大きさには依存しません。
//!
//! イメージは一度だけオフラインで構築され、以後は不変です。
//! 不変イメージに対する複数スレッドからの同時読み出しは安全です。

use std::collections::BTreeMap;

use crate::bitvec::RankedBits;
use crate::codec::{BitStreamWriter, put_i32_le};
use crate::errors::{RenketsuError, Result};

/// 1レベルあたりに消費するキーのビット数
///
/// 子存在マスクを1バイトに収めるため、3以下であることがフォーマットの
/// 前提です。
pub const BITS_PER_LEVEL: u32 = 3;

/// トライのレベル数 (`ceil(32 / BITS_PER_LEVEL)`)
pub const NUM_LEVELS: usize = 32usize.div_ceil(BITS_PER_LEVEL as usize);

/// イメージ末尾の破損検出用マジック定数
pub const IMAGE_TRAILER: u32 = 0x9B7C_5A2E;

/// キーを上位ゼロ拡張した経路ビット数 (`NUM_LEVELS * BITS_PER_LEVEL`)
const TOTAL_BITS: u32 = NUM_LEVELS as u32 * BITS_PER_LEVEL;

/// 値セクションの格納幅
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueWidth {
    /// 1値あたり2バイト
    Wide,
    /// 1値あたり1バイト(量子化モード)
    Byte,
}

impl ValueWidth {
    /// 1値あたりのバイト数を返します。
    #[inline]
    pub const fn num_bytes(self) -> usize {
        match self {
            Self::Wide => 2,
            Self::Byte => 1,
        }
    }
}

/// レベル`level`より浅い部分で消費済みの経路ビット列
#[inline(always)]
fn path_prefix(key: u32, level: usize) -> u64 {
    u64::from(key) >> (TOTAL_BITS - level as u32 * BITS_PER_LEVEL)
}

/// レベル`level`で消費する子インデックス
#[inline(always)]
fn child_index(key: u32, level: usize) -> u8 {
    let shift = TOTAL_BITS - (level as u32 + 1) * BITS_PER_LEVEL;
    ((u64::from(key) >> shift) & ((1 << BITS_PER_LEVEL) - 1)) as u8
}

/// 疎マップのビルダー
///
/// `insert`は何度でも呼べ、同じキーへの再挿入は後勝ちです。
/// `build(self)`は構造を凍結してイメージを生成します。selfを消費するため、
/// 二度目の呼び出しは型システムが禁止します。
pub struct SparseMapBuilder {
    width: ValueWidth,
    entries: BTreeMap<u32, u16>,
}

impl SparseMapBuilder {
    /// 指定した値幅でビルダーを作成します。
    pub const fn new(width: ValueWidth) -> Self {
        Self {
            width,
            entries: BTreeMap::new(),
        }
    }

    /// キーと値のペアを登録します。
    ///
    /// 同じキーに対する後の挿入が先の挿入を上書きします。
    ///
    /// # エラー
    ///
    /// 1バイトモードで値が`0xFF`を超える場合、エラーを返します。
    pub fn insert(&mut self, key: u32, value: u16) -> Result<()> {
        if self.width == ValueWidth::Byte && value > 0xFF {
            return Err(RenketsuError::invalid_argument(
                "value",
                format!("must fit in one byte in quantized mode: {value}"),
            ));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// 登録済みエントリ数を返します。
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// 構造を凍結し、シリアライズ済みイメージを返します。
    ///
    /// キーはソート順に処理され、レベルごとに幅優先で1ノード1バイトの
    /// 子存在マスクが出力されます。各レベルのストリームは4バイト境界に
    /// パディングされます。
    pub fn build(self) -> Vec<u8> {
        let keys: Vec<u32> = self.entries.keys().copied().collect();

        let mut streams = Vec::with_capacity(NUM_LEVELS);
        for level in 0..NUM_LEVELS {
            let mut wtr = BitStreamWriter::new();
            if let Some(&first) = keys.first() {
                // Keys sharing a path prefix at this depth form one node.
                let mut cur = path_prefix(first, level);
                let mut mask = 0u8;
                for &key in &keys {
                    let prefix = path_prefix(key, level);
                    if prefix != cur {
                        wtr.push_byte(mask);
                        mask = 0;
                        cur = prefix;
                    }
                    mask |= 1 << child_index(key, level);
                }
                wtr.push_byte(mask);
            }
            wtr.pad_to_word();
            streams.push(wtr.into_bytes());
        }

        let value_len = self.entries.len() * self.width.num_bytes();
        let mut image = vec![];
        put_i32_le(&mut image, BITS_PER_LEVEL as i32);
        put_i32_le(&mut image, value_len as i32);
        for stream in &streams {
            put_i32_le(&mut image, stream.len() as i32);
        }
        for stream in &streams {
            image.extend_from_slice(stream);
        }
        for &value in self.entries.values() {
            match self.width {
                ValueWidth::Wide => image.extend_from_slice(&value.to_le_bytes()),
                ValueWidth::Byte => image.push(value as u8),
            }
        }
        while image.len() % 4 != 0 {
            image.push(0);
        }
        image.extend_from_slice(&IMAGE_TRAILER.to_le_bytes());
        image
    }
}

/// 疎マップの読み取り器
///
/// 構築時にイメージを型付きビューへ展開し、レベルごとのランク索引を
/// 事前計算します。以後の`peek`はエラーを返さない全域関数です。
pub struct SparseMap {
    levels: Vec<RankedBits>,
    values: Vec<u8>,
    width: ValueWidth,
}

/// イメージからリトルエンディアンの`i32`をひとつ読み進めます。
fn take_i32(image: &[u8], pos: &mut usize) -> Result<i32> {
    let bytes = image
        .get(*pos..*pos + 4)
        .ok_or_else(|| RenketsuError::invalid_format("sparse map image", "truncated header"))?;
    *pos += 4;
    Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
}

impl SparseMap {
    /// イメージを完全検証して読み取り器を構築します。
    ///
    /// セクション長がバッファ実長と一致すること、末尾のトレーラー
    /// マジック、およびレベル間のポップカウント整合性(各レベルの
    /// 立っているビット数が次レベルのノード数、最終レベルでは値の
    /// 個数と一致すること)を確認します。検証を通過したイメージへの
    /// `peek`と`value`は値配列の範囲を超えません。
    ///
    /// # 引数
    ///
    /// * `image` - シリアライズ済みイメージ
    /// * `width` - 値セクションの格納幅
    pub fn from_image(image: &[u8], width: ValueWidth) -> Result<Self> {
        Self::parse(image, width, true)
    }

    /// トレーラー検証を省略して読み取り器を構築します。
    ///
    /// 対応するコンパイラが生成した既知のイメージ向けの高速パスです。
    /// セクションのスライスは境界検査付きのままなので、切り詰められた
    /// イメージは未定義動作ではなく構造化エラーになります。
    pub fn from_image_trusted(image: &[u8], width: ValueWidth) -> Result<Self> {
        Self::parse(image, width, false)
    }

    fn parse(image: &[u8], width: ValueWidth, verify_trailer: bool) -> Result<Self> {
        let mut pos = 0;
        let bits_per_level = take_i32(image, &mut pos)?;
        if bits_per_level != BITS_PER_LEVEL as i32 {
            return Err(RenketsuError::invalid_format(
                "sparse map image",
                format!("unsupported bits_per_level: {bits_per_level}"),
            ));
        }
        let value_len = usize::try_from(take_i32(image, &mut pos)?).map_err(|_| {
            RenketsuError::invalid_format("sparse map image", "negative value section length")
        })?;
        if value_len % width.num_bytes() != 0 {
            return Err(RenketsuError::invalid_format(
                "sparse map image",
                "value section length does not match the value width",
            ));
        }

        let mut lens = [0usize; NUM_LEVELS];
        for len in &mut lens {
            let n = usize::try_from(take_i32(image, &mut pos)?).map_err(|_| {
                RenketsuError::invalid_format("sparse map image", "negative level stream length")
            })?;
            if n % 4 != 0 {
                return Err(RenketsuError::invalid_format(
                    "sparse map image",
                    "level stream length is not 4-byte aligned",
                ));
            }
            *len = n;
        }

        let mut levels = Vec::with_capacity(NUM_LEVELS);
        for len in lens {
            let stream = image.get(pos..pos + len).ok_or_else(|| {
                RenketsuError::invalid_format("sparse map image", "truncated level stream")
            })?;
            pos += len;
            levels.push(RankedBits::new(stream.to_vec()));
        }

        let values = image
            .get(pos..pos + value_len)
            .ok_or_else(|| {
                RenketsuError::invalid_format("sparse map image", "truncated value section")
            })?
            .to_vec();
        pos += value_len;

        if verify_trailer {
            let padding = (4 - value_len % 4) % 4;
            if pos + padding + 4 != image.len() {
                return Err(RenketsuError::invalid_format(
                    "sparse map image",
                    "declared section lengths do not match the buffer length",
                ));
            }
            let trailer = u32::from_le_bytes(image[image.len() - 4..].try_into().unwrap());
            if trailer != IMAGE_TRAILER {
                return Err(RenketsuError::invalid_format(
                    "sparse map image",
                    format!("trailer magic mismatch: {trailer:#010x}"),
                ));
            }

            // Cross-check the per-level popcounts: every set bit opens
            // exactly one node in the next level, and the last level's
            // set bits are the ordinals into the value array. Without
            // this, a phantom bit would send `peek` past the end of the
            // value section.
            let num_values = value_len / width.num_bytes();
            let mut num_nodes = usize::from(num_values != 0);
            for stream in &levels {
                if stream.bytes().len() != num_nodes.next_multiple_of(4) {
                    return Err(RenketsuError::invalid_format(
                        "sparse map image",
                        "level stream length does not match the node count",
                    ));
                }
                if stream.bytes()[..num_nodes].iter().any(|&b| b == 0) {
                    return Err(RenketsuError::invalid_format(
                        "sparse map image",
                        "node mask with no children",
                    ));
                }
                if stream.bytes()[num_nodes..].iter().any(|&b| b != 0) {
                    return Err(RenketsuError::invalid_format(
                        "sparse map image",
                        "set bit in level stream padding",
                    ));
                }
                num_nodes = stream.num_ones() as usize;
            }
            if num_nodes != num_values {
                return Err(RenketsuError::invalid_format(
                    "sparse map image",
                    "leaf count does not match the value section length",
                ));
            }
        }

        Ok(Self {
            levels,
            values,
            width,
        })
    }

    /// キーの有無を調べ、存在すれば値配列への序数を返します。
    ///
    /// 各レベルでキーの上位側から3ビットずつ子インデックスとして消費し、
    /// 存在マスクの該当ビットをrankで次レベルのノード位置へ変換します。
    /// どのレベルでもビットが立っていなければ即座に「不在」です。
    /// この参照は32ビットキー空間全域で失敗しません。
    #[inline]
    pub fn peek(&self, key: u32) -> Option<usize> {
        let mut node = 0usize;
        for (level, stream) in self.levels.iter().enumerate() {
            let child = child_index(key, level);
            let mask = *stream.bytes().get(node)?;
            if mask & (1 << child) == 0 {
                return None;
            }
            node = stream.rank(node * 8 + usize::from(child)) as usize - 1;
        }
        Some(node)
    }

    /// 序数`index`に格納された生の値を返します。
    #[inline]
    pub fn value(&self, index: usize) -> u16 {
        match self.width {
            ValueWidth::Wide => {
                u16::from_le_bytes(self.values[index * 2..index * 2 + 2].try_into().unwrap())
            }
            ValueWidth::Byte => u16::from(self.values[index]),
        }
    }

    /// 格納されているエントリ数を返します。
    pub fn len(&self) -> usize {
        self.values.len() / self.width.num_bytes()
    }

    /// エントリが存在しない場合に`true`を返します。
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
