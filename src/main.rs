//! Driver: parse the CLI, bring the rank up, run the fill, and print the
//! upper-left corner of every tile in rank order.
//!
//! Run under the MPI launcher, e.g. `mpirun -n 4 matserve -d 1000 -a`.

use std::process::exit;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use matserve::{Layout, Node, NodeConfig};

/// Exit code for a rejected command line.
const EX_INVALID: i32 = 22;

#[derive(Parser, Debug)]
#[command(
    name = "matserve",
    about = "Fill a dense elementwise matrix across MPI ranks",
    disable_version_flag = true
)]
struct Args {
    /// Matrix dimensions, as R for a square matrix or R,C
    #[arg(short = 'd', long = "dims", value_parser = parse_pair, default_value = "10000")]
    dims: (i64, i64),

    /// Block grid, as B for a square grid or Br,Bc (default: auto-grid)
    #[arg(short = 'b', long = "blocks", value_parser = parse_pair)]
    blocks: Option<(i64, i64)>,

    /// Choose the block grid automatically (overrides --blocks)
    #[arg(short = 'a', long = "auto-grid")]
    auto_grid: bool,

    /// Distribute and store tiles row-major (the default)
    #[arg(short = 'r', long = "row-major", conflicts_with = "column_major")]
    row_major: bool,

    /// Distribute and store tiles column-major
    #[arg(short = 'c', long = "column-major")]
    column_major: bool,

    /// Rank to elect as the root work server
    #[arg(short = '0', long = "root", default_value_t = 0)]
    root: i32,
}

/// Accepts `N` or `N,M`; a single integer stands for both values.
fn parse_pair(s: &str) -> Result<(i64, i64), String> {
    let parse = |part: &str| -> Result<i64, String> {
        let v: i64 = part
            .trim()
            .parse()
            .map_err(|_| format!("`{part}` is not an integer"))?;
        if v < 1 {
            return Err(format!("`{part}` must be positive"));
        }
        Ok(v)
    };
    match s.split_once(',') {
        Some((a, b)) => Ok((parse(a)?, parse(b)?)),
        None => {
            let v = parse(s)?;
            Ok((v, v))
        }
    }
}

fn kernel(i: i64, j: i64) -> f64 {
    ((i * i + j * j) as f64).sqrt()
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EX_INVALID,
            };
            let _ = err.print();
            exit(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(&args) {
        error!("{err:#}");
        exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = NodeConfig {
        dims: args.dims,
        blocks: if args.auto_grid { None } else { args.blocks },
        layout: match (args.row_major, args.column_major) {
            (_, true) => Layout::ColumnMajor,
            _ => Layout::RowMajor,
        },
        root_rank: args.root,
    };

    let mut node = Node::init(config).context("unable to initialize rank")?;

    if node.rank() == 0 {
        let (rows, cols) = node.geometry().dim_global();
        info!(
            rows,
            cols,
            ranks = node.size(),
            "computing matrix elements A_{{i,j}} = Sqrt[i*i + j*j]"
        );
    }

    node.run(kernel);
    node.print_tile_corners();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_matches_known_values() {
        assert_eq!(kernel(0, 0), 0.0);
        assert_eq!(kernel(0, 1), 1.0);
        assert_eq!(kernel(1, 0), 1.0);
        assert_eq!(kernel(1, 1), 2f64.sqrt());
        assert_eq!(kernel(3, 3), 18f64.sqrt());
    }

    #[test]
    fn pair_syntax() {
        assert_eq!(parse_pair("8"), Ok((8, 8)));
        assert_eq!(parse_pair("6,4"), Ok((6, 4)));
        assert!(parse_pair("0").is_err());
        assert!(parse_pair("a,b").is_err());
        assert!(parse_pair("4,").is_err());
    }
}
