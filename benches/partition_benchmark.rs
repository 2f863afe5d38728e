//! Performance benchmarks for cpulaunch
//!
//! Run with: cargo bench

use cpulaunch::launcher::parse_list_argument;
use cpulaunch::system::{CpuPoolList, PoolRequest};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Synthetic `lscpu --all --extended` output with hyperthreading
fn synthetic_lscpu(sockets: usize, nodes_per_socket: usize, cores_per_node: usize) -> String {
    let physical = sockets * nodes_per_socket * cores_per_node;
    let mut out = String::from("CPU NODE SOCKET CORE L1d:L1i:L2:L3 ONLINE MAXMHZ MINMHZ\n");

    for thread in 0..2 {
        for core in 0..physical {
            let cpu = thread * physical + core;
            let node = core / cores_per_node;
            let socket = node / nodes_per_socket;
            out.push_str(&format!(
                "{} {} {} {} {}:{}:{}:{} yes 3800.0000 800.0000\n",
                cpu, node, socket, core, core, core, core, socket
            ));
        }
    }

    out
}

fn bench_parse_lscpu(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_lscpu");

    for (sockets, cores) in [(1, 8), (2, 28), (4, 60)] {
        let txt = synthetic_lscpu(sockets, 2, cores / 2);
        group.bench_with_input(BenchmarkId::from_parameter(sockets * cores * 2), &txt, |b, txt| {
            b.iter(|| black_box(CpuPoolList::from_lscpu(txt).unwrap()));
        });
    }

    group.finish();
}

fn bench_partition(c: &mut Criterion) {
    let topology = CpuPoolList::from_lscpu(&synthetic_lscpu(2, 2, 28)).unwrap();
    let mut group = c.benchmark_group("gen_pools_ondemand");

    let requests = [
        ("single", PoolRequest::default()),
        (
            "by_size",
            PoolRequest {
                ncores_per_instance: 4,
                ..Default::default()
            },
        ),
        (
            "by_count_per_node",
            PoolRequest {
                ninstances: 8,
                skip_cross_node_cores: true,
                ..Default::default()
            },
        ),
        (
            "logical",
            PoolRequest {
                ncores_per_instance: 2,
                use_logical_cores: true,
                ..Default::default()
            },
        ),
    ];

    for (name, request) in &requests {
        group.bench_function(*name, |b| {
            b.iter(|| black_box(topology.gen_pools_ondemand(request).unwrap()));
        });
    }

    group.finish();
}

fn bench_parse_ranges(c: &mut Criterion) {
    c.bench_function("parse_list_argument", |b| {
        b.iter(|| black_box(parse_list_argument("0-27,56-83,112,113,114-139").unwrap()));
    });
}

criterion_group!(benches, bench_parse_lscpu, bench_partition, bench_parse_ranges);
criterion_main!(benches);
