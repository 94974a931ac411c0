//! Then steps for transfer scenarios.

use podscp::api::TransferResult;
use rstest_bdd_macros::then;

use super::StepResult;
use super::engine::{FakeEngine, INVOKER_UID, StoreKey};
use super::state::TransferState;

fn result(transfer_state: &TransferState) -> StepResult<TransferResult> {
    transfer_state
        .result
        .get()
        .ok_or_else(|| String::from("transfer should have run"))
}

fn engine(transfer_state: &TransferState) -> StepResult<FakeEngine> {
    transfer_state
        .engine
        .get()
        .ok_or_else(|| String::from("engine should be set"))
}

fn failure_message(transfer_state: &TransferState) -> StepResult<String> {
    let outcome = result(transfer_state)?;
    if outcome.success {
        return Err(format!("expected the transfer to fail, got {outcome:?}"));
    }
    outcome
        .message
        .ok_or_else(|| String::from("a failed transfer should carry a message"))
}

fn assert_holds(transfer_state: &TransferState, key: &StoreKey, image: &str) -> StepResult<()> {
    if engine(transfer_state)?.holds(key, image) {
        Ok(())
    } else {
        Err(format!("expected {key:?} to hold {image}"))
    }
}

#[then("the transfer succeeds with image {image}")]
fn transfer_succeeds(transfer_state: &TransferState, image: String) -> StepResult<()> {
    let outcome = result(transfer_state)?;
    if !outcome.success {
        return Err(format!("transfer failed: {:?}", outcome.message));
    }
    assert_eq!(outcome.image, Some(image));
    assert!(outcome.message.is_none());
    Ok(())
}

#[then("the transfer fails with {message}")]
fn transfer_fails_with(transfer_state: &TransferState, message: String) -> StepResult<()> {
    assert_eq!(failure_message(transfer_state)?, message);
    Ok(())
}

#[then("the transfer fails mentioning {text}")]
fn transfer_fails_mentioning(transfer_state: &TransferState, text: String) -> StepResult<()> {
    let message = failure_message(transfer_state)?;
    assert!(message.starts_with("Error: "), "missing marker: {message}");
    assert!(message.contains(&text), "expected '{text}' in: {message}");
    Ok(())
}

#[then("the transfer fails naming the connection address")]
fn transfer_fails_naming_address(transfer_state: &TransferState) -> StepResult<()> {
    let address = transfer_state
        .unreachable_address
        .get()
        .ok_or_else(|| String::from("an unreachable connection should be configured"))?;
    let message = failure_message(transfer_state)?;
    assert!(
        message.starts_with("Error: failed to connect: dial tcp "),
        "unexpected message: {message}"
    );
    assert!(message.contains(&address), "expected '{address}' in: {message}");
    Ok(())
}

#[then("root's store holds {image}")]
fn root_holds(transfer_state: &TransferState, image: String) -> StepResult<()> {
    assert_holds(transfer_state, &StoreKey::Local(0), &image)
}

#[then("alice's store holds {image}")]
fn alice_holds(transfer_state: &TransferState, image: String) -> StepResult<()> {
    assert_holds(transfer_state, &StoreKey::Local(INVOKER_UID), &image)
}

#[then("host {host} holds {image}")]
fn host_holds(transfer_state: &TransferState, host: String, image: String) -> StepResult<()> {
    assert_holds(transfer_state, &StoreKey::Remote(host), &image)
}

#[then("no command ran as another account")]
fn no_command_as_another_account(transfer_state: &TransferState) -> StepResult<()> {
    let switched: Vec<_> = engine(transfer_state)?
        .launched()
        .into_iter()
        .filter(|spec| spec.run_as.is_some())
        .collect();
    assert!(switched.is_empty(), "unexpected commands: {switched:?}");
    Ok(())
}

#[then("no secure-shell client was started")]
fn no_ssh_client(transfer_state: &TransferState) -> StepResult<()> {
    let started = engine(transfer_state)?
        .launched()
        .iter()
        .any(|spec| spec.program == "ssh");
    assert!(!started, "the secure-shell client should not run");
    Ok(())
}
