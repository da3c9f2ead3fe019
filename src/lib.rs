/*!
 # server-setup

 Shared start-up of a test server for integration tests that run in parallel.

 ## Overview

 server-setup provides functionality to:
 - Start the server process once per named instance, or use a pre-provisioned one
 - Wait until a set of HTTP paths return the expected content
 - Install and start additional bundles through the server's web console
 - Wait a quiet period once the server has settled
 - Optionally keep the server up for tests running in another process

 Every step runs at most once per instance, however many tests call
 [`ServerSetup::ensure_ready`] and from however many tasks. Failed readiness
 checks and bundle installations are sticky, so later tests fail fast.

 ## Basic Usage

 ```no_run
 use server_setup::{InstanceRegistry, Properties, Result, ServerSetup};

 #[tokio::main]
 async fn main() -> Result<()> {
     let registry = InstanceRegistry::new();

     // Properties usually come from the environment of the test run
     let props = Properties::from_env()
         .with("server.ready.path.1", "/index.html:Welcome")
         .with("server.ready.path.2", "/system/health:^OK$:regexp");

     let setup = ServerSetup::for_instance(&registry, "default", props)?;

     // Starts the server on first use, then returns immediately
     let base_url = setup.server_base_url().await?;
     println!("Testing against {} as {}", base_url, setup.username());

     // After each test
     setup.cleanup().await;
     Ok(())
 }
 ```

 ## Features

 - **Exactly-once start-up**: shared, named instance state with one-way phases
 - **Readiness probing**: substring or regular expression checks with timeouts
 - **Bundle installation**: directory scanning with ordered prefix selection
 - **Configuration**: flat properties from JSON files or the environment
 - **Tracing**: all lifecycle steps are instrumented with `tracing`
*/

pub mod bundles;
pub mod client;
pub mod config;
pub mod error;
pub mod launcher;
pub mod readiness;
pub mod setup;
pub mod state;

pub use client::{AdminClient, HttpClient, HttpResponse, ServerClient};
pub use config::{Properties, SetupConfig};
pub use error::{Error, Result};
pub use launcher::{JarLauncher, ProcessLauncher};
pub use setup::{Backend, Clients, HttpBackend, ServerSetup, SetupId};
pub use state::{DEFAULT_INSTANCE_NAME, InstanceRegistry, InstanceState};
