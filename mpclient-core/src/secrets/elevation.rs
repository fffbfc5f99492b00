//! Scoped acquisition of the system security context.
//!
//! Both tactics change host state that must be put back: a relaxed ACL on the
//! protected-storage location, or a thread impersonating a duplicated system
//! token. [`ElevatedScope`] holds the acquired state and releases it when the
//! scope ends, whether that is an explicit [`ElevatedScope::close`], an early
//! return, or a panic unwinding through it.

use serde::Serialize;

use super::host::{AclGrant, HostSecurity, ImpersonationToken};
use super::SecretError;

/// Which tactic to use to reach the system context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElevationTactic {
    AclRelaxation,
    TokenDuplication,
}

/// A reversible change to the host's security state.
pub trait Elevation {
    /// State needed to undo the change.
    type Guard;

    fn tactic(&self) -> ElevationTactic;

    /// Apply the change.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::Elevation`. Nothing is left modified on failure.
    fn acquire(&self) -> Result<Self::Guard, SecretError>;

    /// Undo the change.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::Release` if the original state could not be restored.
    fn release(&self, guard: Self::Guard) -> Result<(), SecretError>;
}

/// An acquired elevation, released exactly once.
pub struct ElevatedScope<'a, E: Elevation> {
    elevation: &'a E,
    guard: Option<E::Guard>,
}

impl<'a, E: Elevation> ElevatedScope<'a, E> {
    /// Acquire `elevation` for the lifetime of the returned scope.
    ///
    /// # Errors
    ///
    /// Propagates the acquire failure; no scope exists and nothing needs release.
    pub fn enter(elevation: &'a E) -> Result<Self, SecretError> {
        let guard = elevation.acquire()?;
        Ok(Self {
            elevation,
            guard: Some(guard),
        })
    }

    /// Release now and report whether restoration succeeded.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::Release` if the host state could not be restored.
    pub fn close(mut self) -> Result<(), SecretError> {
        match self.guard.take() {
            Some(guard) => self.elevation.release(guard),
            None => Ok(()),
        }
    }
}

impl<E: Elevation> Drop for ElevatedScope<'_, E> {
    fn drop(&mut self) {
        // Reached on error and unwind paths; the original failure is the one
        // returned, so a failed release can only be logged here.
        if let Some(guard) = self.guard.take() {
            if let Err(e) = self.elevation.release(guard) {
                tracing::error!(
                    tactic = ?self.elevation.tactic(),
                    error = %e,
                    cause = ?std::error::Error::source(&e).map(ToString::to_string),
                    "host left elevated: release failed while unwinding"
                );
            }
        }
    }
}

/// Run `f` inside an elevated scope.
///
/// # Errors
///
/// Returns the acquire error if elevation fails (and `f` is not run), or the
/// release error if restoration fails after `f` returned.
pub fn with_elevation<E, T>(elevation: &E, f: impl FnOnce() -> T) -> Result<T, SecretError>
where
    E: Elevation,
{
    let scope = ElevatedScope::enter(elevation)?;
    let value = f();
    scope.close()?;
    Ok(value)
}

/// Temporarily grant the current user access to the protected-storage ACL.
pub struct AclRelaxation<'h, H: HostSecurity + ?Sized> {
    host: &'h H,
}

impl<'h, H: HostSecurity + ?Sized> AclRelaxation<'h, H> {
    pub fn new(host: &'h H) -> Self {
        Self { host }
    }
}

impl<H: HostSecurity + ?Sized> Elevation for AclRelaxation<'_, H> {
    type Guard = AclGrant;

    fn tactic(&self) -> ElevationTactic {
        ElevationTactic::AclRelaxation
    }

    fn acquire(&self) -> Result<AclGrant, SecretError> {
        self.host
            .relax_secret_acl()
            .map_err(|cause| SecretError::Elevation {
                tactic: ElevationTactic::AclRelaxation,
                cause,
            })
    }

    fn release(&self, grant: AclGrant) -> Result<(), SecretError> {
        self.host
            .restore_secret_acl(grant)
            .map_err(|cause| SecretError::Release {
                tactic: ElevationTactic::AclRelaxation,
                cause,
            })
    }
}

/// Impersonate a duplicated system token on the current thread.
pub struct TokenDuplication<'h, H: HostSecurity + ?Sized> {
    host: &'h H,
}

impl<'h, H: HostSecurity + ?Sized> TokenDuplication<'h, H> {
    pub fn new(host: &'h H) -> Self {
        Self { host }
    }
}

impl<H: HostSecurity + ?Sized> Elevation for TokenDuplication<'_, H> {
    type Guard = ImpersonationToken;

    fn tactic(&self) -> ElevationTactic {
        ElevationTactic::TokenDuplication
    }

    fn acquire(&self) -> Result<ImpersonationToken, SecretError> {
        self.host
            .impersonate_system()
            .map_err(|cause| SecretError::Elevation {
                tactic: ElevationTactic::TokenDuplication,
                cause,
            })
    }

    fn release(&self, token: ImpersonationToken) -> Result<(), SecretError> {
        self.host
            .revert_impersonation(token)
            .map_err(|cause| SecretError::Release {
                tactic: ElevationTactic::TokenDuplication,
                cause,
            })
    }
}
