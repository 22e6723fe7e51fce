//! End-to-end tests for correio. See the `tests/` directory.
