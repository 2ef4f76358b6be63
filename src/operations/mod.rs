//! One module per command family, each owning the state of its single in-flight command: what
//! text to send next, and how to interpret the next `Reply`/`Done` against it. `ControlSocket`
//! drives these through the `OperationBody` sum type in `crate::operation`; none of them talk to
//! the helper process directly, only through the `OpContext` handed to `send`.

pub mod change_dir;
pub mod chmod;
pub mod connect;
pub mod delete;
pub mod file_transfer;
pub mod list;
pub mod mkdir;
pub mod remove_dir;
pub mod rename;
