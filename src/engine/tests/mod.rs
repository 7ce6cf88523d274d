//! Engine behavior tests, split by the moving part under test.

mod pool;
