//! End-to-end check on a one-rank world: every element write is local, the
//! pool drains and completes in-process, and shutdown needs no peer traffic.
//!
//! The fabric can only be initialized once per process, so this lives alone
//! in its own integration binary and is ignored unless an MPI runtime is
//! around to host it.

use matserve::{IndexPair, Layout, Node, NodeConfig};

fn kernel(i: i64, j: i64) -> f64 {
    ((i * i + j * j) as f64).sqrt()
}

#[test]
#[ignore = "needs an MPI runtime: mpirun -n 1 single_rank --ignored"]
fn single_rank_fills_and_shuts_down() {
    let config = NodeConfig {
        dims: (8, 8),
        blocks: None,
        layout: Layout::RowMajor,
        root_rank: 0,
    };
    let mut node = Node::init(config).expect("single rank init");
    assert_eq!(node.size(), 1);
    assert!(node.is_root());
    assert_eq!(node.geometry().dim_blocks(), (1, 1));

    node.run(kernel);

    for i in 0..8 {
        for j in 0..8 {
            let got = node
                .local_value(IndexPair::new(i, j))
                .expect("every cell is local on a one-rank world");
            assert_eq!(got, kernel(i, j));
        }
    }

    let buf = node.into_tile_buffer();
    assert_eq!(buf.len(), 64);
    assert_eq!(buf[0], 0.0);
}
