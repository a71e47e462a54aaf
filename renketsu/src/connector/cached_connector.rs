//! コスト参照のダイレクトマップキャッシュ
//!
//! ビタビ探索は同じ(右ID, 左ID)ペアを何度も照会するため、読み取り器の
//! 手前に固定サイズのダイレクトマップキャッシュを置いて同一照会を
//! 吸収します。衝突は単純に上書きで解決され、チェーンはありません。
//!
//! スロットは`Cell`による内部可変性で更新されるため、この型は`Sync`を
//! 実装せず、複数スレッドでの共有はコンパイル時に禁止されます。
//! 「スレッドごとに1インスタンス」の規律はコメントではなく型で
//! 強制されます。

use std::cell::Cell;

use crate::connector::{ConnectorCost, ConnectorView, encode_key};
use crate::errors::{RenketsuError, Result};

/// 既定のキャッシュスロット数
pub const DEFAULT_CACHE_SIZE: usize = 1024;

/// 空スロットを示す予約キー値
///
/// 符号化済みキーの`u16::MAX`同士のペアに相当します。このペアの照会は
/// 空スロットと区別できないため、キャッシュを素通りして内側の読み取り器へ
/// 委譲されます。
const EMPTY_KEY: u32 = u32::MAX;

/// キャッシュの1スロット
#[derive(Clone, Copy)]
struct CacheSlot {
    key: u32,
    cost: i32,
}

const EMPTY_SLOT: CacheSlot = CacheSlot {
    key: EMPTY_KEY,
    cost: 0,
};

/// 任意のコスト読み取り器を包むキャッシュ装飾子
///
/// `cost`の結果は内側の読み取り器と常に一致します。キャッシュの
/// ヒット/ミスや呼び出し順序が観測可能な値を変えることはありません。
pub struct CachedConnector<C> {
    inner: C,
    slots: Box<[Cell<CacheSlot>]>,
    mask: usize,
}

impl<C> CachedConnector<C> {
    /// キャッシュサイズを指定して装飾子を作成します。
    ///
    /// インデックス還元をビットマスクで行うため、サイズは2のべき乗で
    /// なければなりません。
    ///
    /// # エラー
    ///
    /// `cache_size`が2のべき乗でない場合、エラーを返します。
    pub fn new(inner: C, cache_size: usize) -> Result<Self> {
        if !cache_size.is_power_of_two() {
            return Err(RenketsuError::invalid_argument(
                "cache_size",
                format!("must be a power of two: {cache_size}"),
            ));
        }
        Ok(Self {
            inner,
            slots: vec![Cell::new(EMPTY_SLOT); cache_size].into_boxed_slice(),
            mask: cache_size - 1,
        })
    }

    /// 既定サイズのキャッシュで装飾子を作成します。
    pub fn with_default_cache(inner: C) -> Self {
        Self {
            inner,
            slots: vec![Cell::new(EMPTY_SLOT); DEFAULT_CACHE_SIZE].into_boxed_slice(),
            mask: DEFAULT_CACHE_SIZE - 1,
        }
    }

    /// 内側の読み取り器への参照を返します。
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// 全スロットを空スロット番兵へ戻します。
    ///
    /// 直後の照会はキーによらず内側の読み取り器から再計算されます。
    pub fn clear_cache(&self) {
        for slot in &self.slots {
            slot.set(EMPTY_SLOT);
        }
    }

    /// 符号化済みキーからスロット位置を求めます。
    #[inline(always)]
    fn bucket(&self, key: u32) -> usize {
        // Fibonacci hashing spreads the dense low bits of the key; the
        // fold keeps all 32 hash bits in play for caches larger than
        // 2^16 slots.
        let h = key.wrapping_mul(0x9E37_79B9);
        (h ^ (h >> 16)) as usize & self.mask
    }
}

impl<C: Clone> CachedConnector<C> {
    /// 同じ内側読み取り器と同じ容量で、空のキャッシュを持つ装飾子を
    /// 作成します。
    pub(crate) fn fork(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            slots: vec![Cell::new(EMPTY_SLOT); self.slots.len()].into_boxed_slice(),
            mask: self.mask,
        }
    }
}

impl<C: ConnectorView> ConnectorView for CachedConnector<C> {
    #[inline(always)]
    fn num_left(&self) -> usize {
        self.inner.num_left()
    }

    #[inline(always)]
    fn num_right(&self) -> usize {
        self.inner.num_right()
    }
}

impl<C: ConnectorCost> ConnectorCost for CachedConnector<C> {
    #[inline(always)]
    fn cost(&self, right_id: u16, left_id: u16) -> i32 {
        let key = encode_key(right_id, left_id);
        if key == EMPTY_KEY {
            // Indistinguishable from an empty slot; a cold cache would
            // otherwise report the slot's resting cost for this pair.
            return self.inner.cost(right_id, left_id);
        }
        let cell = &self.slots[self.bucket(key)];
        let slot = cell.get();
        if slot.key == key {
            return slot.cost;
        }
        let cost = self.inner.cost(right_id, left_id);
        cell.set(CacheSlot { key, cost });
        cost
    }

    #[inline(always)]
    fn resolution(&self) -> u32 {
        self.inner.resolution()
    }
}
