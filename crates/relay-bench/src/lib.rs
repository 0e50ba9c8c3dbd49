//! Benchmarks for Relay. See `benches/` and `src/bin/`.
