//! Build script for proctracer-core
//!
//! Checks system requirements before compilation:
//! - Minimum Rust version (Edition 2021 = Rust 1.56.0+)
//! - Exactly one floating-point transport feature selected

fn main()
{
    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::parse("1.56.0").unwrap();

        if rustc_version < min_rust_version {
            panic!(
                "proctracer-core requires Rust {} or newer (Edition 2021), found {}",
                min_rust_version, rustc_version
            );
        }
    } else {
        println!("cargo:warning=could not verify Rust version");
    }

    let fp_features = [
        cfg!(feature = "fp-legacy"),
        cfg!(feature = "fp-avx"),
        cfg!(feature = "fp-avx512"),
    ];
    let enabled = fp_features.iter().filter(|&&f| f).count();

    if enabled != 1 {
        panic!(
            "proctracer-core requires exactly one of fp-legacy, fp-avx, fp-avx512 to be enabled, found {}",
            enabled
        );
    }
}
