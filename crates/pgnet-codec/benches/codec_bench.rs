//! Benchmark: progressive encode, full decode and incremental level merging.

use pgnet_codec::{decode_exact, encode, BitWidthInterface, LevelAccumulator};
use std::time::Instant;

fn time<F: FnMut()>(iters: usize, mut f: F) -> f64 {
    let start = Instant::now();
    for _ in 0..iters {
        f();
    }
    start.elapsed().as_secs_f64() / iters as f64
}

fn main() {
    println!("=== pgnet Codec Benchmark ===\n");

    let interfaces = ["2,2,2,2,2,2,2,2", "4,4,8,16", "8,8"];
    let sizes = [4_096usize, 65_536, 1_048_576];

    println!(
        "{:<18} {:>10} {:>12} {:>12} {:>14} {:>10}",
        "Interface", "Elements", "Encode (ms)", "Decode (ms)", "Merge all (ms)", "MB/s enc"
    );
    println!("{}", "-".repeat(82));

    for spec in interfaces {
        let iface: BitWidthInterface = match spec.parse() {
            Ok(i) => i,
            Err(e) => {
                eprintln!("bad interface {spec}: {e}");
                continue;
            }
        };
        for &n in &sizes {
            let data: Vec<f32> = (0..n).map(|i| ((i * 7 + 3) % 13) as f32 * 0.1 - 0.6).collect();
            let iters = (8_388_608 / n).clamp(2, 200);

            let enc_secs = time(iters, || {
                let _ = encode(&data, &iface).unwrap();
            });
            let encoded = encode(&data, &iface).unwrap();

            let dec_secs = time(iters, || {
                let _ = decode_exact(&encoded.buffers, &encoded.params, &iface, n).unwrap();
            });

            let merge_secs = time(iters, || {
                let mut acc = LevelAccumulator::new(iface.clone(), encoded.params, n).unwrap();
                for buf in &encoded.buffers {
                    acc.push_level(buf).unwrap();
                }
                let _ = acc.values().unwrap();
            });

            let mb = (n * 4) as f64 / 1e6;
            println!(
                "{:<18} {:>10} {:>12.3} {:>12.3} {:>14.3} {:>10.1}",
                spec,
                n,
                enc_secs * 1e3,
                dec_secs * 1e3,
                merge_secs * 1e3,
                mb / enc_secs
            );
        }
    }
}
