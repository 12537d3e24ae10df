// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

fn main() {
    println!(r#"cargo:rustc-check-cfg=cfg(irqflow_has_basepri)"#);
    println!(r#"cargo:rustc-check-cfg=cfg(irqflow_has_native_rmw)"#);
    println!("cargo:rerun-if-changed=build.rs");

    let target = std::env::var("TARGET").unwrap();
    let arch = target.split('-').next().unwrap_or_default();

    match arch {
        "thumbv7m" | "thumbv7em" | "thumbv8m.main" => {
            // BASEPRI lets the critical section leave the top priority
            // class running.
            println!("cargo:rustc-cfg=irqflow_has_basepri");
            // LDREX/STREX back the compare-exchange retry loops.
            println!("cargo:rustc-cfg=irqflow_has_native_rmw");
        }
        "thumbv8m.base" => {
            // Exclusives, but no BASEPRI.
            println!("cargo:rustc-cfg=irqflow_has_native_rmw");
        }
        "thumbv6m" => {
            // Don't turn anything on.
        }
        a if a.starts_with("thumb") || a.starts_with("arm") => {
            panic!("unknown target {}, update build.rs", target);
        }
        _ => {
            // Hosted targets (tests) have native compare-exchange.
            println!("cargo:rustc-cfg=irqflow_has_native_rmw");
        }
    }
}
