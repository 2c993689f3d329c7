//! Tests for the write-coalescing pipeline
