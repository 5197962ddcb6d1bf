//! Per-stage timing of the relay loop under loopback traffic.
//!
//! ```bash
//! cargo run -p basalt-perf --release --bin perf_report
//! ```

use basalt_perf::report::{Workload, print_stage_table, run_workload};

const WORKLOADS: [Workload; 3] = [
    Workload {
        clients: 2,
        messages: 2_000,
        payload_len: 64,
    },
    Workload {
        clients: 16,
        messages: 2_000,
        payload_len: 64,
    },
    Workload {
        clients: 16,
        messages: 500,
        payload_len: 4096,
    },
];

fn main() {
    let bar = "\u{2550}".repeat(82);
    println!("\n{bar}");
    println!("  BASALT RELAY LOOP REPORT");
    println!("  per-stage nanoseconds, loopback TCP");
    println!("{bar}");

    for workload in WORKLOADS {
        println!(
            "\n  {} clients, {} messages of {} B:\n",
            workload.clients, workload.messages, workload.payload_len
        );
        let relay = run_workload(workload).expect("relay workload failed");
        print_stage_table(relay.perf());
    }
    println!();
}
