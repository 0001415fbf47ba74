//! Fuzz testing for initialization parameter routing.
//!
//! Feeds arbitrary parameter maps through the router and the setters of a
//! signing validator and a two-alias proxy. Initialization must never panic,
//! whatever names and values a caller sends.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the routing fuzz target
//! cargo +nightly fuzz run fuzz_route_params
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_route_params -- -max_total_time=60
//! ```

#![no_main]

use std::collections::HashMap;

use apiinit::gate::settings::{apply_proxy_settings, apply_sign_settings, route_params};
use apiinit::{ProxyRegistry, SignValidator};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|params: HashMap<String, String>| {
    let routed = route_params(&params);

    // Every routed setting came from exactly one input parameter
    assert!(routed.sign.len() + routed.proxy_len() <= params.len());

    let sign = SignValidator::default();
    let proxy = ProxyRegistry::with_aliases(["b1", "b2"]);

    let sign_report = apply_sign_settings(&sign, &routed.sign);
    let proxy_report = apply_proxy_settings(&proxy, &routed.proxy);

    assert_eq!(sign_report.applied + sign_report.ignored, routed.sign.len());
    assert_eq!(proxy_report.applied + proxy_report.ignored, routed.proxy_len());
});
