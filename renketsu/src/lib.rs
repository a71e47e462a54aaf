//! # Renketsu
//!
//! Renketsuは、日本語入力メソッドエンジンの探索ホットパスで毎秒数百万回
//! 照会される品詞間バイグラム接続コスト行列を、密配列よりはるかに小さい
//! メモリで保持し、サブマイクロ秒で参照するためのコンパクトな格納・
//! キャッシュ層です。
//!
//! ## 概要
//!
//! 行列の大半のセルは行ごとのデフォルトコストに一致するため、例外セル
//! だけをランク索引付きビットマスクトライ(簡潔疎マップ)に格納します。
//! 参照コストはトライのレベル数のみに比例し、表の大きさに依存しません。
//! その手前にダイレクトマップキャッシュを置き、探索が繰り返す同一照会を
//! 吸収します。
//!
//! ## 主な機能
//!
//! - **簡潔疎マップ**: 32ビットキーから小整数値への不変な写像
//! - **接続コスト行列**: 行デフォルトの括り出しと1バイト量子化モード
//! - **オフラインコンパイラ**: 自己検査付きのバイナリイメージ生成
//! - **スレッド専有キャッシュ**: `Sync`非実装による共有禁止の型強制
//!
//! ## 使用例
//!
//! ```
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use renketsu::{ConnectionDataBuilder, Connector, LoadMode};
//!
//! let matrix_def = "3 3\n0 0 0\n0 1 5\n0 2 5\n1 0 5\n1 1 0\n1 2 5\n2 0 5\n2 1 5\n2 2 0";
//!
//! let builder = ConnectionDataBuilder::new(3, 0, 1)?;
//! let data = builder.compile(matrix_def.as_bytes())?;
//!
//! let connector = Connector::from_reader(data.as_slice(), LoadMode::Validate)?;
//! assert_eq!(connector.cost(0, 0), 0);
//! assert_eq!(connector.cost(0, 1), 5);
//! assert_eq!(connector.resolution(), 1);
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("`target_pointer_width` must be 32 or 64");

/// ランク索引付きビットベクター
pub mod bitvec;

/// ビットストリームの書き込みユーティリティ
pub mod codec;

/// 接続コストのコネクターとコンパイラ
pub mod connector;

/// エラー型の定義
pub mod errors;

/// 簡潔ビットマスクトライによる疎マップ
pub mod sparse_map;

#[cfg(test)]
mod tests;

// Re-exports
pub use connector::{
    CachedConnector, ConnectionDataBuilder, Connector, ConnectorCost, ConnectorView, INVALID_COST,
    LoadMode, SparseConnector,
};

/// このライブラリのバージョン番号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
