//! ランク索引付きビットベクター
//!
//! このモジュールは、バイト列に対する「位置p以前の立っているビット数」
//! (rank)をほぼO(1)で答えるビットベクターを提供します。
//! 疎マップのトライ降下を支える基本演算です。

/// ランク索引のワード幅(バイト単位)
const WORD_BYTES: usize = 8;

/// バイト列と、ワードごとの累積ポップカウント索引
///
/// バイト内のビット`i`は`(byte >> i) & 1`です。索引は構築時に一度だけ
/// 計算され、以後は不変です。複数スレッドからの同時読み出しは安全です。
pub struct RankedBits {
    bytes: Vec<u8>,
    ranks: Vec<u32>,
}

impl RankedBits {
    /// バイト列からランク索引を構築します。
    ///
    /// # 引数
    ///
    /// * `bytes` - ビット列を格納したバイトバッファ
    pub fn new(bytes: Vec<u8>) -> Self {
        let mut ranks = Vec::with_capacity(bytes.len() / WORD_BYTES + 1);
        let mut acc = 0u32;
        for chunk in bytes.chunks(WORD_BYTES) {
            ranks.push(acc);
            for b in chunk {
                acc += b.count_ones();
            }
        }
        ranks.push(acc);
        Self { bytes, ranks }
    }

    /// 内部のバイトバッファを返します。
    #[inline(always)]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 位置`pos`のビットを返します。
    #[inline(always)]
    pub fn get(&self, pos: usize) -> bool {
        (self.bytes[pos / 8] >> (pos % 8)) & 1 != 0
    }

    /// 位置`pos`以前(当該ビットを含む)の立っているビット数を返します。
    ///
    /// # 引数
    ///
    /// * `pos` - ビット位置 (`pos / 8 < bytes.len()`であること)
    #[inline(always)]
    pub fn rank(&self, pos: usize) -> u32 {
        let byte_pos = pos / 8;
        let word = byte_pos / WORD_BYTES;
        let mut r = self.ranks[word];
        for b in &self.bytes[word * WORD_BYTES..byte_pos] {
            r += b.count_ones();
        }
        // Bits 0..=pos%8 of the byte containing pos.
        let mask = !0u8 >> (7 - pos % 8);
        r + (self.bytes[byte_pos] & mask).count_ones()
    }

    /// 立っているビットの総数を返します。
    #[inline(always)]
    pub fn num_ones(&self) -> u32 {
        *self.ranks.last().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_single_byte() {
        // 0b1011_0010: bits 1, 4, 5, 7 are set.
        let bv = RankedBits::new(vec![0b1011_0010]);
        assert!(!bv.get(0));
        assert!(bv.get(1));
        assert_eq!(bv.rank(0), 0);
        assert_eq!(bv.rank(1), 1);
        assert_eq!(bv.rank(3), 1);
        assert_eq!(bv.rank(4), 2);
        assert_eq!(bv.rank(5), 3);
        assert_eq!(bv.rank(6), 3);
        assert_eq!(bv.rank(7), 4);
        assert_eq!(bv.num_ones(), 4);
    }

    #[test]
    fn rank_across_words() {
        // 20 bytes spans three 8-byte words.
        let bytes: Vec<u8> = (0..20).map(|i| if i % 3 == 0 { 0xFF } else { 0x01 }).collect();
        let bv = RankedBits::new(bytes.clone());
        let mut expected = 0;
        for pos in 0..bytes.len() * 8 {
            if (bytes[pos / 8] >> (pos % 8)) & 1 != 0 {
                expected += 1;
            }
            assert_eq!(bv.rank(pos), expected, "pos={pos}");
        }
        assert_eq!(bv.num_ones(), expected);
    }

    #[test]
    fn rank_empty() {
        let bv = RankedBits::new(vec![]);
        assert_eq!(bv.num_ones(), 0);
        assert!(bv.bytes().is_empty());
    }
}
