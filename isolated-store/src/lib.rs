//! Private, disposable Nix stores.
//!
//! Each [`StoreHandle`] owns a directory tree laid out like a chroot store
//! (`<base>/nix/store`, `<base>/nix/var/nix`, `<base>/etc/nix`). Applying its
//! environment to [`nix_executor::Options`] makes every nix invocation use it instead
//! of the shared store. Handles share no state, so stores under distinct base
//! directories never need coordination.

mod error;
mod gcroot;
mod refs;
mod resolve;
mod seed;
mod store;

pub use error::{StoreError, StoreResult};
pub use gcroot::GcRoot;
pub use refs::{STORE_DIR, find_store_references};
pub use resolve::resolve_physical_path;
pub use seed::ClosureManifest;
pub use store::{
    IN_SANDBOX_FLAG_ENV, ISOLATED_STORE_ROOT_ENV, StoreHandle, create_isolated_store,
};
