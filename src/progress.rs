//! The `[====    ] n/total (nn%)` progress bar, and the final-pass total
//! work computation it's driven by.

/// Computes the total amount of work an execute pass will report progress
/// against.
///
/// The original implementation maintained a running `num_nodes` counter
/// that it patched during graph construction (decrementing it for a
/// specific DELETE/MODIFY overlap edge case — see [`crate::builder`]'s
/// `add_file`). Here it's computed once, after the graph is fully built,
/// as a straight count of every non-root node that will actually be
/// dispatched: a `Cmd` node always dispatches (update or delete), while a
/// `File` node only dispatches when it is flagged exactly `DELETE`, since
/// a MODIFY-flagged file is purely informational (its dependents react to
/// it, but the file itself is never touched).
pub fn count_dispatched_nodes(g: &crate::graph::Graph) -> usize {
    use crate::db::{Flags, NodeType};

    g.node_list_iter()
        .filter(|&idx| {
            let n = g.node(idx);
            match n.node_type {
                NodeType::Cmd => true,
                NodeType::File => n.flags == Flags::DELETE,
                NodeType::Dir | NodeType::Ghost => false,
            }
        })
        .count()
}

/// Renders a 40-character progress bar to stdout: `[===    ] n/tot (nn%)`.
///
/// When `tot` exceeds the bar width, the fill is scaled (`#`) rather than
/// drawn one character per unit (`=`). Does nothing when `show` is false
/// or `tot` is zero (matching the original's guard against a divide by
/// zero when there is no work to report). Prints a trailing newline only
/// once `n == tot`, so the bar updates in place on a single terminal line
/// until the run completes.
pub fn show_progress(show: bool, n: usize, tot: usize) {
    const MAX: usize = 40;

    if !show || tot == 0 {
        return;
    }

    let (a, b, c) = if tot > MAX {
        (n * MAX / tot, MAX, '#')
    } else {
        (n, tot, '=')
    };

    print!("[");
    for _ in 0..a {
        print!("{}", c);
    }
    for _ in a..b {
        print!(" ");
    }
    print!("] {}/{} ({:3}%) ", n, tot, n * 100 / tot);
    if n == tot {
        println!();
    }
    use std::io::Write;
    let _ = std::io::stdout().flush();
}
