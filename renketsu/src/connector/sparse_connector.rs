//! 疎マップイメージ上の接続コスト行列読み取り器
//!
//! バイナリイメージは、ヘッダー(マジック、量子化刻み、行列幅)、
//! 行ごとのデフォルトコスト配列、4バイト境界へのパディング、
//! 埋め込み疎マップイメージの順に並びます(リトルエンディアン)。
//! 行列の大半のセルは行デフォルトに一致するため、疎マップには
//! 例外セルだけが格納されています。

use crate::connector::{ConnectorCost, ConnectorView, INVALID_COST, encode_key};
use crate::errors::{RenketsuError, Result};
use crate::sparse_map::{SparseMap, ValueWidth};

/// このコンテナ形式を識別する固定マジック値
pub const CONNECTION_MAGIC: u16 = 0x636D;

/// 量子化モードで[`INVALID_COST`]を表す予約バイト値
pub(crate) const UNREACHABLE_BYTE: u8 = 0xFF;

/// イメージからリトルエンディアンの`u16`をひとつ読み進めます。
fn take_u16(data: &[u8], pos: &mut usize) -> Result<u16> {
    let bytes = data
        .get(*pos..*pos + 2)
        .ok_or_else(|| RenketsuError::invalid_format("connection data", "truncated header"))?;
    *pos += 2;
    Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
}

/// 接続コスト行列の読み取り器
///
/// 構築時にヘッダーを型付きビューへ展開し、以後のコスト参照は
/// アロケーションなし、トライのレベル数に比例する時間で完了します。
/// この構造体は不変であり、[`std::sync::Arc`]で包んで複数スレッドから
/// 同時に読み出せます。
pub struct SparseConnector {
    resolution: u32,
    default_costs: Vec<i16>,
    map: SparseMap,
}

impl SparseConnector {
    /// バイナリイメージを完全検証して読み取り器を構築します。
    ///
    /// 埋め込み疎マップのセクション長とトレーラーマジックまで確認する
    /// ため、外部由来のイメージでも破損が構築時の構造化エラーになります。
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::parse(data, true)
    }

    /// トレーラー検証を省略して読み取り器を構築します。
    ///
    /// 対応するコンパイラの自己検査を通過した既知のイメージ向けの
    /// 高速パスです。スライスは境界検査付きのままです。
    pub fn from_bytes_trusted(data: &[u8]) -> Result<Self> {
        Self::parse(data, false)
    }

    fn parse(data: &[u8], verify: bool) -> Result<Self> {
        let mut pos = 0;
        let magic = take_u16(data, &mut pos)?;
        if magic != CONNECTION_MAGIC {
            return Err(RenketsuError::invalid_format(
                "connection data",
                format!("magic mismatch: {magic:#06x}"),
            ));
        }
        let resolution = take_u16(data, &mut pos)?;
        if resolution == 0 {
            return Err(RenketsuError::invalid_format(
                "connection data",
                "resolution must be positive",
            ));
        }
        let width = take_u16(data, &mut pos)?;
        let width_repeat = take_u16(data, &mut pos)?;
        if width != width_repeat {
            return Err(RenketsuError::invalid_format(
                "connection data",
                "matrix width fields disagree",
            ));
        }

        let mut default_costs = Vec::with_capacity(usize::from(width));
        for _ in 0..width {
            let cost = take_u16(data, &mut pos)? as i16;
            default_costs.push(cost);
        }
        // Sections are 4-byte aligned; an odd width leaves two pad bytes.
        pos += (4 - pos % 4) % 4;
        let image = data.get(pos..).ok_or_else(|| {
            RenketsuError::invalid_format("connection data", "missing sparse map image")
        })?;

        let value_width = if resolution == 1 {
            ValueWidth::Wide
        } else {
            ValueWidth::Byte
        };
        let map = if verify {
            SparseMap::from_image(image, value_width)?
        } else {
            SparseMap::from_image_trusted(image, value_width)?
        };

        Ok(Self {
            resolution: u32::from(resolution),
            default_costs,
            map,
        })
    }

    /// 疎マップに格納されている例外セル数を返します。
    pub fn num_exceptions(&self) -> usize {
        self.map.len()
    }
}

impl ConnectorView for SparseConnector {
    #[inline(always)]
    fn num_left(&self) -> usize {
        self.default_costs.len()
    }

    #[inline(always)]
    fn num_right(&self) -> usize {
        self.default_costs.len()
    }
}

impl ConnectorCost for SparseConnector {
    #[inline(always)]
    fn cost(&self, right_id: u16, left_id: u16) -> i32 {
        let key = encode_key(right_id, left_id);
        if let Some(index) = self.map.peek(key) {
            let raw = self.map.value(index);
            if self.resolution == 1 {
                return i32::from(raw as i16);
            }
            if raw == u16::from(UNREACHABLE_BYTE) {
                return INVALID_COST;
            }
            return i32::from(raw) * self.resolution as i32;
        }
        // A miss is the expected steady state: most cells equal the row
        // default by construction.
        self.default_costs
            .get(usize::from(right_id))
            .map_or(INVALID_COST, |&c| i32::from(c))
    }

    #[inline(always)]
    fn resolution(&self) -> u32 {
        self.resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectionDataBuilder;

    // 2x2 matrix with one exception per row.
    const MATRIX_DEF: &str = "2 2\n0 0 0\n0 1 7\n1 0 7\n1 1 0\n";

    fn compile_small() -> Vec<u8> {
        let builder = ConnectionDataBuilder::new(2, 0, 1).unwrap();
        builder.compile(MATRIX_DEF.as_bytes()).unwrap()
    }

    #[test]
    fn load_and_query() {
        let data = compile_small();
        let conn = SparseConnector::from_bytes(&data).unwrap();
        assert_eq!(conn.num_left(), 2);
        assert_eq!(conn.num_right(), 2);
        assert_eq!(conn.resolution(), 1);
        assert_eq!(conn.cost(0, 0), 0);
        assert_eq!(conn.cost(0, 1), 7);
        assert_eq!(conn.cost(1, 0), 7);
        assert_eq!(conn.cost(1, 1), 0);
    }

    #[test]
    fn out_of_range_ids_resolve_to_invalid() {
        let data = compile_small();
        let conn = SparseConnector::from_bytes(&data).unwrap();
        assert_eq!(conn.cost(2, 0), INVALID_COST);
        assert_eq!(conn.cost(u16::MAX, u16::MAX), INVALID_COST);
        // Out-of-range left id within a valid row falls back to the row
        // default, never an error.
        assert_eq!(conn.cost(0, 2), 7);
    }

    #[test]
    fn magic_mismatch_is_rejected() {
        let mut data = compile_small();
        data[0] ^= 0xFF;
        assert!(SparseConnector::from_bytes(&data).is_err());
        assert!(SparseConnector::from_bytes_trusted(&data).is_err());
    }

    #[test]
    fn corrupt_trailer_rejected_only_by_validated_load() {
        let mut data = compile_small();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        assert!(SparseConnector::from_bytes(&data).is_err());
        assert!(SparseConnector::from_bytes_trusted(&data).is_ok());
    }

    #[test]
    fn truncated_data_is_a_structured_error() {
        let data = compile_small();
        assert!(SparseConnector::from_bytes(&data[..3]).is_err());
        assert!(SparseConnector::from_bytes_trusted(&data[..3]).is_err());
        assert!(SparseConnector::from_bytes(&data[..10]).is_err());
    }
}
