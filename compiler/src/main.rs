//! 接続コスト行列コンパイラのメインエントリーポイント
//!
//! テキスト定義ファイル群(コスト表、カテゴリID定義、特殊カテゴリ定義)
//! からバイナリ接続データを生成するオフラインツールです。書き出した
//! イメージは全セルの往復検査を通ってから成功を報告します。
//! 定義ファイルの不整合は回復不能であり、非ゼロ終了コードで失敗します。

use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use renketsu::ConnectionDataBuilder;
use renketsu::errors::RenketsuError;

/// コマンドライン引数の構造体
///
/// `clap`を使用してコマンドライン引数をパースします。
#[derive(Parser, Debug)]
#[clap(
    name = "compile",
    version,
    about = "A program to compile the binary connection cost matrix."
)]
struct Args {
    /// Connection cost table (matrix.def).
    #[clap(short = 'm', long)]
    matrix_in: PathBuf,

    /// Category id definition file (id.def).
    #[clap(short = 'i', long)]
    id_def_in: PathBuf,

    /// Special category definition file; blank lines and lines starting
    /// with `#` are ignored.
    #[clap(short = 's', long)]
    special_def_in: PathBuf,

    /// File to which the binary connection data is output.
    #[clap(short = 'o', long)]
    connection_out: PathBuf,

    /// Quantization step for the 1-byte storage mode.
    ///
    /// The default of 1 selects the unscaled 2-byte mode. Larger values
    /// store one byte per exception cell at the cost of rounding every
    /// cost to a multiple of the resolution.
    #[clap(short = 'r', long, default_value = "1")]
    resolution: u32,
}

/// コンパイラの実行中に発生する可能性のあるエラー
#[derive(Debug, Error)]
pub enum CompileError {
    /// 入出力エラー
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 接続データ構築エラー
    #[error("Connection data compilation failed: {0}")]
    Renketsu(#[from] RenketsuError),
}

/// コンパイルを実行する
///
/// 定義ファイルからカテゴリ数を導出し、コスト表をバイナリイメージへ
/// コンパイルして自己検査付きで書き出します。
fn run(args: Args) -> Result<(), CompileError> {
    let builder = ConnectionDataBuilder::from_readers(
        File::open(&args.id_def_in)?,
        File::open(&args.special_def_in)?,
        args.resolution,
    )?;
    println!(
        "Compiling a {}x{} connection matrix (resolution {})...",
        builder.width(),
        builder.width(),
        builder.resolution()
    );

    builder.compile_to_path(File::open(&args.matrix_in)?, &args.connection_out)?;

    println!(
        "Successfully compiled and verified the connection data to {}",
        args.connection_out.display()
    );
    Ok(())
}

/// メイン関数
///
/// コマンドライン引数をパースしてコンパイルを実行します。失敗時は
/// エラーを返し、プロセスは非ゼロ終了コードで終了します。
fn main() -> Result<(), CompileError> {
    run(Args::parse())
}
