#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Scan,
    Connect,
}

/// Runtime permission lookup. A missing permission turns radio operations into silent no-ops.
pub trait Permissions: Send + Sync + 'static {
    fn has_permission(&self, permission: Permission) -> bool;
}

/// Desktop platforms prompt (if at all) on first radio use, so every check passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

impl Permissions for AlwaysGranted {
    fn has_permission(&self, _permission: Permission) -> bool {
        true
    }
}
