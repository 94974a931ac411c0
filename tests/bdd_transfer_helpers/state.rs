//! Scenario state for transfer behavioural tests.

use podscp::api::TransferResult;
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::ScenarioState;

use super::engine::{FakeEngine, INVOKER_UID};

#[derive(Default, ScenarioState)]
pub(crate) struct TransferState {
    /// Simulated engine stores shared with the launcher.
    pub(crate) engine: Slot<FakeEngine>,
    /// `containers.conf` text for the scenario.
    pub(crate) containers_conf: Slot<String>,
    /// Address of a connection that refuses connections.
    pub(crate) unreachable_address: Slot<String>,
    /// Outcome of the transfer under test.
    pub(crate) result: Slot<TransferResult>,
}

#[fixture]
pub(crate) fn transfer_state() -> TransferState {
    let state = TransferState::default();
    state.engine.set(FakeEngine::new(INVOKER_UID));
    state.containers_conf.set(String::new());
    state
}
