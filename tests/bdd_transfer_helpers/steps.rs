//! Given/when steps for transfer scenarios.

use std::net::TcpListener;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use podscp::address::Credential;
use podscp::api::{TransferOptions, TransferServices, transfer};
use podscp::connections::ContainersConfStore;
use podscp::engine::EngineCli;
use podscp::error::{PlanError, Result as ScpResult};
use podscp::plan::RemoteTarget;
use podscp::transport::{ConnectFuture, OpenSshClient, SecureShell};
use podscp::users::{UserDirectory, UserIdentity};
use rstest_bdd_macros::{given, when};
use tokio::time::Instant;

use super::StepResult;
use super::engine::{INVOKER_UID, StoreKey};
use super::state::TransferState;

const CONTAINERS_CONF: &str = "/home/alice/.config/containers/containers.conf";

/// The accounts `alice` and `root`.
struct StaticUsers;

fn identity(name: &str, uid: u32) -> UserIdentity {
    let home = if uid == 0 {
        Utf8PathBuf::from("/root")
    } else {
        Utf8PathBuf::from(format!("/home/{name}"))
    };
    UserIdentity {
        name: String::from(name),
        uid,
        gid: uid,
        home,
    }
}

impl UserDirectory for StaticUsers {
    fn current(&self) -> ScpResult<UserIdentity> {
        Ok(identity("alice", INVOKER_UID))
    }

    fn resolve(&self, credential: &Credential) -> ScpResult<UserIdentity> {
        match credential {
            Credential::Name(name) if name == "root" => Ok(identity("root", 0)),
            Credential::Ids { uid: 0, .. } => Ok(identity("root", 0)),
            Credential::Name(name) if name == "alice" => Ok(identity("alice", INVOKER_UID)),
            Credential::Ids { uid, .. } if *uid == INVOKER_UID => {
                Ok(identity("alice", INVOKER_UID))
            }
            other => Err(PlanError::UnknownUser {
                credential: other.to_string(),
            }
            .into()),
        }
    }
}

/// A secure shell whose sessions open without dialling.
struct ReachableShell {
    client: OpenSshClient,
}

impl SecureShell for ReachableShell {
    fn connect(&self, target: &RemoteTarget, _deadline: Option<Instant>) -> ConnectFuture {
        let session = self.client.session(target.clone());
        Box::pin(async move { Ok(session) })
    }
}

fn ssh_client() -> OpenSshClient {
    OpenSshClient::new("ssh", "podman", Duration::from_secs(5))
}

fn add_connection(transfer_state: &TransferState, alias: &str, uri: &str) {
    let mut conf = transfer_state.containers_conf.get().unwrap_or_default();
    conf.push_str(&format!(
        "[engine.service_destinations.{alias}]\nuri = \"{uri}\"\n"
    ));
    transfer_state.containers_conf.set(conf);
}

fn add_image(transfer_state: &TransferState, key: StoreKey, image: &str) -> StepResult<()> {
    let engine = transfer_state
        .engine
        .get()
        .ok_or_else(|| String::from("engine should be set"))?;
    engine.add_image(key, image);
    Ok(())
}

#[given("alice is the invoking user")]
fn given_alice_invokes(transfer_state: &TransferState) {
    // The fixture's engine already runs as alice.
    let _ = transfer_state;
}

#[given("alice's store holds {image}")]
fn given_alice_holds(transfer_state: &TransferState, image: String) -> StepResult<()> {
    add_image(transfer_state, StoreKey::Local(INVOKER_UID), &image)
}

#[given("host {host} holds {image}")]
fn given_host_holds(transfer_state: &TransferState, host: String, image: String) -> StepResult<()> {
    add_image(transfer_state, StoreKey::Remote(host), &image)
}

#[given("connection {alias} refuses connections")]
fn given_connection_refuses(transfer_state: &TransferState, alias: String) -> StepResult<()> {
    let listener = TcpListener::bind("127.0.0.1:0").map_err(|e| e.to_string())?;
    let port = listener.local_addr().map_err(|e| e.to_string())?.port();
    drop(listener);
    add_connection(
        transfer_state,
        &alias,
        &format!("ssh://root@127.0.0.1:{port}"),
    );
    transfer_state
        .unreachable_address
        .set(format!("127.0.0.1:{port}"));
    Ok(())
}

#[given("connection {alias} points at {uri}")]
fn given_connection(transfer_state: &TransferState, alias: String, uri: String) {
    add_connection(transfer_state, &alias, &uri);
}

fn run_transfer(transfer_state: &TransferState, source: &str, destination: &str) -> StepResult<()> {
    let engine = transfer_state
        .engine
        .get()
        .ok_or_else(|| String::from("engine should be set"))?;
    let conf = transfer_state.containers_conf.get().unwrap_or_default();
    let connections = ContainersConfStore::from_toml(Utf8Path::new(CONTAINERS_CONF), &conf)
        .map_err(|e| e.to_string())?;
    let invoker_store = EngineCli::local(&engine, "podman", None);

    let reachable = ReachableShell {
        client: ssh_client(),
    };
    let dialling = ssh_client();
    let shell: &dyn SecureShell = if transfer_state.unreachable_address.get().is_some() {
        &dialling
    } else {
        &reachable
    };

    let services = TransferServices {
        users: &StaticUsers,
        connections: &connections,
        launcher: &engine,
        shell,
        invoker_store: &invoker_store,
        engine_program: "podman",
    };
    let options = TransferOptions {
        quiet: true,
        deadline: Some(Duration::from_secs(30)),
    };

    let runtime = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
    let result = runtime.block_on(transfer(source, destination, options, services));
    transfer_state.result.set(result);
    Ok(())
}

#[when("alice copies {source} with no destination")]
fn when_copies_without_destination(
    transfer_state: &TransferState,
    source: String,
) -> StepResult<()> {
    run_transfer(transfer_state, &source, "")
}

#[when("alice copies {source} to {destination}")]
fn when_copies(
    transfer_state: &TransferState,
    source: String,
    destination: String,
) -> StepResult<()> {
    run_transfer(transfer_state, &source, &destination)
}
