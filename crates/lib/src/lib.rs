//! b-lib: synchronization and integrity engine for the `b` workspace tool.
//!
//! The engine provisions a project-scoped directory of external artifacts:
//! executable binaries fetched from release providers, and sets of files
//! synced from git repositories. It keeps them pinned via a
//! SHA-256-verified lockfile (`b.lock`).
//!
//! The crate is organized around four subsystems:
//! - `provider`: classifying refs and fetching release metadata
//! - `gitcache` + `envmatch` + `envsync`: git-backed file sync with
//!   three-way merge
//! - `lock`: the durable on-disk record
//! - `orchestrate`: concurrent install/update pipelines
//!
//! The CLI crate (`b-cli`) is a thin clap layer over this engine.

pub mod archive;
pub mod cancel;
pub mod consts;
pub mod envmatch;
pub mod envsync;
pub mod gitcache;
pub mod install;
pub mod lock;
pub mod manifest;
pub mod orchestrate;
pub mod paths;
pub mod preset;
pub mod process;
pub mod provider;
pub mod refspec;
pub mod verify;
