//! 接続コスト計算のためのコネクター
//!
//! このモジュールは、品詞カテゴリ間のバイグラム接続コストを
//! 照会するためのコネクター実装を提供します。
//!
//! - [`SparseConnector`]: 疎マップイメージ上のコスト行列読み取り器
//! - [`CachedConnector`]: 検索ホットパス用のダイレクトマップキャッシュ装飾子
//! - [`Connector`]: 両者を合成し、検索アルゴリズムへ渡す単一のファサード
//! - [`ConnectionDataBuilder`]: テキスト定義からバイナリイメージを生成する
//!   オフラインコンパイラ

pub(crate) mod builder;
mod cached_connector;
mod sparse_connector;

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

pub use crate::connector::builder::ConnectionDataBuilder;
pub use crate::connector::cached_connector::{CachedConnector, DEFAULT_CACHE_SIZE};
pub use crate::connector::sparse_connector::{CONNECTION_MAGIC, SparseConnector};
use crate::errors::Result;

/// 到達不能セルを表す周知のコスト番兵
///
/// ビタビ探索はこの値を「接続不可」として扱います。コスト参照は
/// エラーを返さない全域関数であるため、不正なIDや未定義セルも
/// この値に解決されます。
pub const INVALID_COST: i32 = 30000;

/// (右カテゴリID, 左カテゴリID)を疎マップの32ビットキーへ符号化します。
///
/// 右IDが上位16ビット、左IDが下位16ビットです。
#[inline(always)]
pub const fn encode_key(right_id: u16, left_id: u16) -> u32 {
    (right_id as u32) << 16 | left_id as u32
}

/// コネクターのビュー機能を提供するトレイト
pub trait ConnectorView {
    /// 左接続IDの最大数を返します。
    fn num_left(&self) -> usize;

    /// 右接続IDの最大数を返します。
    fn num_right(&self) -> usize;
}

/// 接続コスト計算機能を提供するトレイト
pub trait ConnectorCost: ConnectorView {
    /// 接続行列の値を取得します。
    ///
    /// # 引数
    ///
    /// * `right_id` - 右接続ID
    /// * `left_id` - 左接続ID
    ///
    /// # 戻り値
    ///
    /// 接続コスト。未定義セルは行デフォルトまたは[`INVALID_COST`]に
    /// 解決され、この呼び出しが失敗することはありません。
    fn cost(&self, right_id: u16, left_id: u16) -> i32;

    /// 量子化の刻み幅を返します。
    ///
    /// 1は非量子化を意味します。呼び出し側はこの値で丸め誤差の上限を
    /// 見積もれます。
    fn resolution(&self) -> u32;
}

impl<C: ConnectorView> ConnectorView for Arc<C> {
    #[inline(always)]
    fn num_left(&self) -> usize {
        (**self).num_left()
    }

    #[inline(always)]
    fn num_right(&self) -> usize {
        (**self).num_right()
    }
}

impl<C: ConnectorCost> ConnectorCost for Arc<C> {
    #[inline(always)]
    fn cost(&self, right_id: u16, left_id: u16) -> i32 {
        (**self).cost(right_id, left_id)
    }

    #[inline(always)]
    fn resolution(&self) -> u32 {
        (**self).resolution()
    }
}

/// バイナリイメージの読み込みモード
///
/// 安全性とパフォーマンスのトレードオフを制御します。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// セクション長とトレーラーマジックを完全に検証します(最も安全)。
    Validate,

    /// 対応するコンパイラが生成した既知のイメージと信頼し、
    /// トレーラー検証を省略します。切り詰められたイメージは
    /// このモードでも構造化エラーになります。
    Trust,
}

/// 検索アルゴリズムへ渡す接続コストのファサード
///
/// 不変な[`SparseConnector`]イメージを[`Arc`]で共有し、その手前に
/// スレッド専有のダイレクトマップキャッシュを置きます。キャッシュが
/// 内包する`Cell`により、この型は`Sync`を実装しません。スレッドごとに
/// [`Connector::new_handle`]で専用ハンドルを作成してください。
///
/// エンジンインスタンスごとに1つ構築して参照で引き回すことを想定して
/// おり、プロセス全域の可変シングルトンは存在しません。
pub struct Connector {
    cache: CachedConnector<Arc<SparseConnector>>,
}

impl Connector {
    /// 既定サイズのキャッシュを持つファサードを作成します。
    pub fn new(inner: Arc<SparseConnector>) -> Self {
        Self {
            cache: CachedConnector::with_default_cache(inner),
        }
    }

    /// キャッシュサイズを指定してファサードを作成します。
    ///
    /// # エラー
    ///
    /// `cache_size`が2のべき乗でない場合、エラーを返します。
    pub fn with_cache_size(inner: Arc<SparseConnector>, cache_size: usize) -> Result<Self> {
        Ok(Self {
            cache: CachedConnector::new(inner, cache_size)?,
        })
    }

    /// リーダーからバイナリイメージを読み込みます。
    ///
    /// # 引数
    ///
    /// * `rdr` - バイナリイメージのリーダー
    /// * `mode` - 検証戦略を指定する[`LoadMode`]
    pub fn from_reader<R: Read>(mut rdr: R, mode: LoadMode) -> Result<Self> {
        let mut data = vec![];
        rdr.read_to_end(&mut data)?;
        let inner = match mode {
            LoadMode::Validate => SparseConnector::from_bytes(&data)?,
            LoadMode::Trust => SparseConnector::from_bytes_trusted(&data)?,
        };
        Ok(Self::new(Arc::new(inner)))
    }

    /// ファイルからバイナリイメージを読み込みます。
    ///
    /// I/Oはこの一度だけで、以後のコスト参照はCPUのみで完結します。
    pub fn from_path<P: AsRef<Path>>(path: P, mode: LoadMode) -> Result<Self> {
        Self::from_reader(File::open(path)?, mode)
    }

    /// 接続コストを取得します。
    ///
    /// キャッシュにヒットした場合、内側の読み取り器は呼ばれません。
    #[inline(always)]
    pub fn cost(&self, right_id: u16, left_id: u16) -> i32 {
        self.cache.cost(right_id, left_id)
    }

    /// 量子化の刻み幅を返します。
    #[inline(always)]
    pub fn resolution(&self) -> u32 {
        self.cache.resolution()
    }

    /// 行列の一辺の大きさ(通常カテゴリ数+特殊カテゴリ数)を返します。
    pub fn num_categories(&self) -> usize {
        self.cache.num_right()
    }

    /// キャッシュの全スロットを空に戻します。
    ///
    /// 直後の参照は必ず内側の読み取り器から再計算されます。
    pub fn clear_cache(&self) {
        self.cache.clear_cache();
    }

    /// 同じ不変イメージを共有する新しいハンドルを作成します。
    ///
    /// キャッシュは新しい空のものが割り当てられます。スレッドごとに
    /// 1ハンドルの規律はこの操作で実現してください。
    pub fn new_handle(&self) -> Self {
        Self {
            cache: self.cache.fork(),
        }
    }
}

impl ConnectorView for Connector {
    fn num_left(&self) -> usize {
        self.cache.num_left()
    }

    fn num_right(&self) -> usize {
        self.cache.num_right()
    }
}

impl ConnectorCost for Connector {
    #[inline(always)]
    fn cost(&self, right_id: u16, left_id: u16) -> i32 {
        Connector::cost(self, right_id, left_id)
    }

    #[inline(always)]
    fn resolution(&self) -> u32 {
        Connector::resolution(self)
    }
}
