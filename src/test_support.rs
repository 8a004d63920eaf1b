//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::provider::{
    CreateParams, GatewayFuture, ImageRef, InstanceHandle, NodeStatus, ProviderGateway, SizeRef,
};
use crate::session::{CommandOutput, CommandRunner, SessionError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: std::rc::Rc<std::cell::RefCell<VecDeque<CommandOutput>>>,
    invocations: std::rc::Rc<std::cell::RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SessionError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| SessionError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Error type raised by [`FakeGateway`] when scripted to fail.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fake provider failure: {0}")]
pub struct FakeGatewayError(
    /// Description of the scripted failure.
    pub String,
);

/// One recorded call against [`FakeGateway`].
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayCall {
    /// `create_instance` with the submitted name, size id, image id and
    /// parameters.
    CreateInstance {
        /// Instance name submitted.
        name: String,
        /// Size id submitted.
        size: String,
        /// Image id submitted.
        image: String,
        /// Extra parameters submitted.
        params: CreateParams,
    },
    /// `list_instances`.
    ListInstances,
    /// `delete_instance` with the instance id.
    DeleteInstance {
        /// Id of the instance deleted.
        id: String,
    },
    /// `wait_until_running` with the instance ids waited on.
    WaitUntilRunning {
        /// Ids waited on.
        ids: Vec<String>,
    },
    /// `resolve_image` with the identifier looked up.
    ResolveImage {
        /// Identifier looked up.
        identifier: String,
    },
    /// `list_sizes`.
    ListSizes,
    /// `import_key_pair` with the registered name and public key line.
    ImportKeyPair {
        /// Key pair name registered.
        name: String,
        /// Public key line registered.
        public_key: String,
    },
    /// `delete_key_pair` with the removed name.
    DeleteKeyPair {
        /// Key pair name removed.
        name: String,
    },
}

#[derive(Debug, Default)]
struct FakeGatewayState {
    listings: VecDeque<Vec<InstanceHandle>>,
    steady_listing: Vec<InstanceHandle>,
    create_response: Option<Result<InstanceHandle, FakeGatewayError>>,
    delete_response: Option<Result<(), FakeGatewayError>>,
    images: BTreeMap<String, ImageRef>,
    sizes: Vec<SizeRef>,
    calls: Vec<GatewayCall>,
}

/// Scripted provider gateway double.
///
/// Listings queue up and are consumed in FIFO order; once the queue drains,
/// the steady listing (empty by default, meaning "instance gone") is
/// returned forever. Create and delete outcomes are scriptable; everything
/// else succeeds.
#[derive(Clone, Debug, Default)]
pub struct FakeGateway {
    state: Arc<Mutex<FakeGatewayState>>,
}

/// Builds an instance snapshot with the fixture addresses used in tests.
#[must_use]
pub fn instance(id: &str, name: &str, status: NodeStatus) -> InstanceHandle {
    InstanceHandle {
        id: id.to_owned(),
        name: name.to_owned(),
        public_ips: vec![String::from("198.51.100.10")],
        private_ips: vec![String::from("10.0.0.10")],
        status,
    }
}

impl FakeGateway {
    /// Creates a gateway with empty scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeGatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a listing returned by the next `list_instances` call.
    pub fn push_listing(&self, listing: Vec<InstanceHandle>) {
        self.lock().listings.push_back(listing);
    }

    /// Sets the listing returned once the queue is drained.
    pub fn set_steady_listing(&self, listing: Vec<InstanceHandle>) {
        self.lock().steady_listing = listing;
    }

    /// Scripts the outcome of the next `create_instance` call. Without a
    /// script, create succeeds with a running snapshot derived from the
    /// submitted name.
    pub fn set_create_response(&self, response: Result<InstanceHandle, FakeGatewayError>) {
        self.lock().create_response = Some(response);
    }

    /// Scripts the outcome of `delete_instance` calls (default: success).
    pub fn set_delete_response(&self, response: Result<(), FakeGatewayError>) {
        self.lock().delete_response = Some(response);
    }

    /// Registers an image for `resolve_image` lookups.
    pub fn insert_image(&self, identifier: &str, image: ImageRef) {
        self.lock().images.insert(identifier.to_owned(), image);
    }

    /// Sets the size catalog returned by `list_sizes`.
    pub fn set_sizes(&self, sizes: Vec<SizeRef>) {
        self.lock().sizes = sizes;
    }

    /// Returns all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    /// Counts recorded `delete_instance` calls.
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, GatewayCall::DeleteInstance { .. }))
            .count()
    }

    /// Returns the parameters submitted to the first `create_instance` call.
    #[must_use]
    pub fn created_params(&self) -> Option<CreateParams> {
        self.calls().into_iter().find_map(|call| match call {
            GatewayCall::CreateInstance { params, .. } => Some(params),
            _ => None,
        })
    }

    /// Returns the name submitted to the first `create_instance` call.
    #[must_use]
    pub fn created_name(&self) -> Option<String> {
        self.calls().into_iter().find_map(|call| match call {
            GatewayCall::CreateInstance { name, .. } => Some(name),
            _ => None,
        })
    }
}

impl ProviderGateway for FakeGateway {
    type Error = FakeGatewayError;

    fn create_instance<'a>(
        &'a self,
        name: &'a str,
        size: &'a SizeRef,
        image: &'a ImageRef,
        params: &'a CreateParams,
    ) -> GatewayFuture<'a, InstanceHandle, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(GatewayCall::CreateInstance {
                name: name.to_owned(),
                size: size.id.clone(),
                image: image.id.clone(),
                params: params.clone(),
            });
            state
                .create_response
                .clone()
                .unwrap_or_else(|| Ok(instance("i-fake", name, NodeStatus::Running)))
        })
    }

    fn list_instances(&self) -> GatewayFuture<'_, Vec<InstanceHandle>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(GatewayCall::ListInstances);
            let next = state
                .listings
                .pop_front()
                .unwrap_or_else(|| state.steady_listing.clone());
            Ok(next)
        })
    }

    fn delete_instance<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(GatewayCall::DeleteInstance {
                id: handle.id.clone(),
            });
            state.delete_response.clone().unwrap_or(Ok(()))
        })
    }

    fn wait_until_running<'a>(
        &'a self,
        handles: &'a [InstanceHandle],
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(GatewayCall::WaitUntilRunning {
                ids: handles.iter().map(|handle| handle.id.clone()).collect(),
            });
            Ok(())
        })
    }

    fn resolve_image<'a>(&'a self, identifier: &'a str) -> GatewayFuture<'a, ImageRef, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(GatewayCall::ResolveImage {
                identifier: identifier.to_owned(),
            });
            state
                .images
                .get(identifier)
                .cloned()
                .ok_or_else(|| FakeGatewayError(format!("image '{identifier}' not found")))
        })
    }

    fn list_sizes(&self) -> GatewayFuture<'_, Vec<SizeRef>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(GatewayCall::ListSizes);
            Ok(state.sizes.clone())
        })
    }

    fn import_key_pair<'a>(
        &'a self,
        name: &'a str,
        public_key: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(GatewayCall::ImportKeyPair {
                name: name.to_owned(),
                public_key: public_key.to_owned(),
            });
            Ok(())
        })
    }

    fn delete_key_pair<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(GatewayCall::DeleteKeyPair {
                name: name.to_owned(),
            });
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
