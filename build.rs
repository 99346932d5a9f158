//! Build script for `esocial-client`.
//!
//! The client embeds the CA chain of the eSocial web services so that the
//! default settings can complete TLS against them. The chain is read from
//! `certs/esocial_chain.pem` and copied into `OUT_DIR`, where the transport
//! picks it up with `include_bytes!`.
//!
//! When that file is absent an empty placeholder is written instead, so the
//! crate always compiles; at runtime an empty embedded chain means "no
//! bundled chain" and the transport falls back to the built-in roots.

use std::{env, fs, path::Path};

fn main() {
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(v) => v,
        Err(e) => panic!("Missing CARGO_MANIFEST_DIR in build script env: {e}"),
    };
    let out_dir = match env::var("OUT_DIR") {
        Ok(v) => v,
        Err(e) => panic!("Missing OUT_DIR in build script env: {e}"),
    };

    let src_chain = Path::new(&manifest_dir).join("certs").join("esocial_chain.pem");
    let out_chain = Path::new(&out_dir).join("esocial_chain.pem");

    println!("cargo:rerun-if-changed={}", src_chain.display());

    if src_chain.exists() {
        if let Err(e) = fs::copy(&src_chain, &out_chain) {
            panic!(
                "Failed to copy CA chain from {} to {}: {e}",
                src_chain.display(),
                out_chain.display()
            );
        }
    } else if let Err(e) = fs::write(&out_chain, []) {
        panic!(
            "Failed to create placeholder CA chain at {}: {e}",
            out_chain.display()
        );
    }
}
