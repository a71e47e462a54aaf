//! 接続コスト行列のオフラインコンパイラ
//!
//! このモジュールは、テキスト定義ファイル群からバイナリ接続データを
//! 生成するコンパイラを提供します。行ごとの最頻(最大有限)コストを
//! デフォルトとして括り出し、例外セルだけを疎マップに格納します。
//!
//! コンパイルはオフラインツールの文脈で実行されるため、定義ファイルの
//! 不整合は回復不能なエラーとして呼び出し側へ伝播します。

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use crate::codec::{put_i16_le, put_u16_le};
use crate::connector::sparse_connector::{SparseConnector, UNREACHABLE_BYTE};
use crate::connector::{ConnectorCost, INVALID_COST, encode_key};
use crate::errors::{RenketsuError, Result};
use crate::sparse_map::{SparseMapBuilder, ValueWidth};

/// 接続コスト行列をバイナリイメージへコンパイルするビルダー
///
/// 行列の一辺は「通常カテゴリ数 + 特殊カテゴリ数」です。テキスト表が
/// 与えるのは通常カテゴリ間のセルのみで、それ以外の宣言範囲内のセルは
/// [`INVALID_COST`]になります。例外は(BOS, EOS)に当たるセル(0, 0)で、
/// 慣例によりコスト0に固定されます。
pub struct ConnectionDataBuilder {
    id_count: usize,
    special_count: usize,
    resolution: u32,
}

impl ConnectionDataBuilder {
    /// カテゴリ数と量子化刻みを指定してビルダーを作成します。
    ///
    /// # 引数
    ///
    /// * `id_count` - 通常カテゴリIDの個数
    /// * `special_count` - 通常IDの後ろに追加される特殊カテゴリの個数
    /// * `resolution` - 量子化の刻み幅(1で非量子化2バイトモード、
    ///   2以上で1バイト量子化モード)
    ///
    /// # エラー
    ///
    /// `id_count`が0、`resolution`が0または`u16`を超える場合、
    /// および行列幅が16ビットID空間に収まらない場合、エラーを返します。
    pub fn new(id_count: usize, special_count: usize, resolution: u32) -> Result<Self> {
        if id_count == 0 {
            return Err(RenketsuError::invalid_argument(
                "id_count",
                "must be positive",
            ));
        }
        if resolution == 0 || resolution > u32::from(u16::MAX) {
            return Err(RenketsuError::invalid_argument(
                "resolution",
                format!("must be in [1, 65535]: {resolution}"),
            ));
        }
        let width = id_count + special_count;
        if width > usize::from(u16::MAX) {
            return Err(RenketsuError::invalid_argument(
                "special_count",
                format!("matrix width exceeds the 16-bit id space: {width}"),
            ));
        }
        Ok(Self {
            id_count,
            special_count,
            resolution,
        })
    }

    /// 定義ファイルのリーダーからビルダーを作成します。
    ///
    /// # 引数
    ///
    /// * `id_def_rdr` - カテゴリID定義ファイル(`id名前`の行が0から連番)
    /// * `special_def_rdr` - 特殊カテゴリ定義ファイル(空行と`#`開始行は無視)
    /// * `resolution` - 量子化の刻み幅
    pub fn from_readers<I, S>(id_def_rdr: I, special_def_rdr: S, resolution: u32) -> Result<Self>
    where
        I: Read,
        S: Read,
    {
        let id_count = Self::parse_id_def(id_def_rdr)?;
        let special_count = Self::parse_special_def(special_def_rdr)?;
        Self::new(id_count, special_count, resolution)
    }

    /// 行列の一辺の大きさを返します。
    pub fn width(&self) -> usize {
        self.id_count + self.special_count
    }

    /// 量子化の刻み幅を返します。
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// ID定義ファイルをパースし、カテゴリID数を返します。
    ///
    /// 各行は`id 名前`の形式で、IDは0からの連番でなければなりません。
    /// 連番でないIDは回復不能なフォーマットエラーです。
    fn parse_id_def<R: Read>(rdr: R) -> Result<usize> {
        let rdr = BufReader::new(rdr);
        let mut count = 0usize;
        for line in rdr.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let id_str = line.split_whitespace().next().unwrap();
            let id: usize = id_str.parse()?;
            if id != count {
                return Err(RenketsuError::invalid_format(
                    "id.def",
                    format!("ids must be contiguous from 0: expected {count}, got {id}"),
                ));
            }
            count += 1;
        }
        Ok(count)
    }

    /// 特殊カテゴリ定義ファイルをパースし、その行数を返します。
    ///
    /// 空行と`#`で始まる行は数えません。
    fn parse_special_def<R: Read>(rdr: R) -> Result<usize> {
        let rdr = BufReader::new(rdr);
        let mut count = 0usize;
        for line in rdr.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            count += 1;
        }
        Ok(count)
    }

    /// コスト表テキストを宣言範囲の密行列へ展開します。
    ///
    /// 先頭行は`右ID数 左ID数`で、通常カテゴリ数と一致しなければ
    /// なりません。以降の各行は`右ID 左ID コスト`です。
    fn read_dense<R: Read>(&self, matrix_rdr: R) -> Result<Vec<i32>> {
        let width = self.width();
        let mut rdr = BufReader::new(matrix_rdr);

        let mut header = String::new();
        rdr.read_line(&mut header)?;
        let mut spl = header.split_whitespace();
        let num_right = spl.next();
        let num_left = spl.next();
        let rest = spl.next();
        let (num_right, num_left) = match (num_right, num_left, rest) {
            (Some(r), Some(l), None) => (r.parse::<usize>()?, l.parse::<usize>()?),
            _ => {
                return Err(RenketsuError::invalid_format(
                    "matrix.def",
                    format!("the first line must be num_right<space>num_left, {header}"),
                ));
            }
        };
        if num_right != self.id_count || num_left != self.id_count {
            return Err(RenketsuError::invalid_format(
                "matrix.def",
                format!(
                    "matrix dimensions {num_right}x{num_left} do not match the id count {}",
                    self.id_count
                ),
            ));
        }

        let mut dense = vec![INVALID_COST; width * width];
        // Cell (0, 0) joins BOS to EOS and is reachable at cost zero even
        // when the table omits it.
        dense[0] = 0;
        for line in rdr.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut spl = line.split_whitespace();
            let right_str = spl.next();
            let left_str = spl.next();
            let cost_str = spl.next();
            let rest = spl.next();
            let (right_id, left_id, cost) = match (right_str, left_str, cost_str, rest) {
                (Some(r), Some(l), Some(c), None) => {
                    (r.parse::<usize>()?, l.parse::<usize>()?, c.parse::<i32>()?)
                }
                _ => {
                    return Err(RenketsuError::invalid_format(
                        "matrix.def",
                        format!("each line must be right_id<space>left_id<space>cost, {line}"),
                    ));
                }
            };
            if right_id >= self.id_count || left_id >= self.id_count {
                return Err(RenketsuError::invalid_format(
                    "matrix.def",
                    format!("id out of range: ({right_id}, {left_id})"),
                ));
            }
            dense[right_id * width + left_id] = cost;
        }
        Ok(dense)
    }

    /// コストを格納表現へ量子化します。
    ///
    /// 2バイトモードでは符号付き16ビットに収まることを要求します。
    /// 1バイトモードでは刻み幅で丸め、収まらない値は静かな折り返しの
    /// 代わりにビルドを失敗させます。
    fn quantize(&self, cost: i32) -> Result<u16> {
        if self.resolution == 1 {
            let v = i16::try_from(cost).map_err(|_| {
                RenketsuError::invalid_format(
                    "matrix.def",
                    format!("cost does not fit in 16 bits: {cost}"),
                )
            })?;
            return Ok(v as u16);
        }
        if cost == INVALID_COST {
            return Ok(u16::from(UNREACHABLE_BYTE));
        }
        let res = self.resolution as i32;
        let quantized = if cost >= 0 {
            (cost + res / 2) / res
        } else {
            (cost - res / 2) / res
        };
        if !(0..i32::from(UNREACHABLE_BYTE)).contains(&quantized) {
            return Err(RenketsuError::invalid_format(
                "matrix.def",
                format!("cost {cost} does not fit the quantized byte width (resolution {res})"),
            ));
        }
        Ok(quantized as u16)
    }

    /// 密行列からバイナリイメージを組み立てます。
    fn encode(&self, dense: &[i32]) -> Result<Vec<u8>> {
        let width = self.width();

        // The row default is the maximum finite cost in the row; rows with
        // no finite cell keep the unreachable sentinel.
        let mut default_costs = Vec::with_capacity(width);
        for row in dense.chunks(width) {
            let max_finite = row.iter().copied().filter(|&c| c != INVALID_COST).max();
            let default = match max_finite {
                Some(cost) => i16::try_from(cost).map_err(|_| {
                    RenketsuError::invalid_format(
                        "matrix.def",
                        format!("cost does not fit in 16 bits: {cost}"),
                    )
                })?,
                None => INVALID_COST as i16,
            };
            default_costs.push(default);
        }

        let value_width = if self.resolution == 1 {
            ValueWidth::Wide
        } else {
            ValueWidth::Byte
        };
        let mut map_builder = SparseMapBuilder::new(value_width);
        for (right_id, row) in dense.chunks(width).enumerate() {
            for (left_id, &cost) in row.iter().enumerate() {
                if cost == i32::from(default_costs[right_id]) {
                    continue;
                }
                let key = encode_key(right_id as u16, left_id as u16);
                map_builder.insert(key, self.quantize(cost)?)?;
            }
        }

        let mut data = vec![];
        put_u16_le(&mut data, crate::connector::CONNECTION_MAGIC);
        put_u16_le(&mut data, self.resolution as u16);
        put_u16_le(&mut data, width as u16);
        put_u16_le(&mut data, width as u16);
        for &cost in &default_costs {
            put_i16_le(&mut data, cost);
        }
        while data.len() % 4 != 0 {
            data.push(0);
        }
        data.extend_from_slice(&map_builder.build());
        Ok(data)
    }

    /// コスト表テキストをバイナリイメージへコンパイルします。
    ///
    /// # 引数
    ///
    /// * `matrix_rdr` - コスト表テキストのリーダー
    ///
    /// # 戻り値
    ///
    /// 成功時はバイナリイメージのバイト列を返します。
    pub fn compile<R: Read>(&self, matrix_rdr: R) -> Result<Vec<u8>> {
        let dense = self.read_dense(matrix_rdr)?;
        self.encode(&dense)
    }

    /// コンパイル結果をファイルへ書き出し、自己検査を実行します。
    ///
    /// 出力は一時ファイルへ書いてから所定パスへ永続化されます。その後、
    /// 書き出したばかりのファイルを完全検証付きで開き直し、宣言範囲の
    /// 全セルを再照会して元のコストと突き合わせます。この往復検査は
    /// ビルド工程に組み込まれた必須ステップであり、省略できません。
    pub fn compile_to_path<R, P>(&self, matrix_rdr: R, path: P) -> Result<()>
    where
        R: Read,
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let dense = self.read_dense(matrix_rdr)?;
        let data = self.encode(&dense)?;

        let parent = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(parent)?;
        file.write_all(&data)?;
        file.persist(path)?;

        self.verify(&dense, path)
    }

    /// 書き出したイメージを開き直し、全セルを照会して検査します。
    fn verify(&self, dense: &[i32], path: &Path) -> Result<()> {
        let data = fs::read(path)?;
        let conn = SparseConnector::from_bytes(&data).map_err(|e| {
            RenketsuError::invalid_state("connection data verification failed", e.to_string())
        })?;

        let width = self.width();
        for right_id in 0..width {
            for left_id in 0..width {
                let want = dense[right_id * width + left_id];
                let got = conn.cost(right_id as u16, left_id as u16);
                let ok = if want == INVALID_COST || self.resolution == 1 {
                    got == want
                } else {
                    got != INVALID_COST
                        && (i64::from(got) - i64::from(want)).unsigned_abs()
                            < u64::from(self.resolution)
                };
                if !ok {
                    return Err(RenketsuError::invalid_state(
                        "connection data verification failed",
                        format!("cell ({right_id}, {left_id}): want {want}, got {got}"),
                    ));
                }
            }
        }
        Ok(())
    }
}
