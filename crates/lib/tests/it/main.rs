/*! Integration tests for Strata.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - branch: Tests for the branch tree, segments and rebase bookkeeping
 * - store: Tests for the branch document store
 * - revision: Tests for the revision cache and revision manager
 * - delta: Tests for diffing, composing and applying revision deltas
 * - repository: End-to-end tests through the Repository facade
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strata=info")))
        .with_test_writer()
        .try_init();
}

mod branch;
mod delta;
mod helpers;
mod repository;
mod revision;
mod store;
