//! Host facilities of the machine the binary runs on.

use mpclient_core::secrets::{DataProtection, HostSecurity};

use super::{LiveStore, LocalError, LocalObjects};

/// The host's security, data-protection and configuration-object facilities.
pub struct Facilities {
    pub host: Box<dyn HostSecurity>,
    pub protection: Box<dyn DataProtection>,
    pub objects: Box<dyn LocalObjects>,
}

impl Facilities {
    #[must_use]
    pub fn live_store(&self) -> LiveStore<'_, dyn LocalObjects> {
        LiveStore::new(&*self.objects)
    }
}

/// The facilities of this host.
///
/// # Errors
///
/// `LocalError::Unsupported` when this build has no backend for the
/// platform, which is currently every platform.
// TODO: Windows backend: CryptUnprotectData, the LSA secrets key ACL, SYSTEM
// token duplication and the root\ccm\policy\Machine\ActualConfig namespace.
pub fn facilities() -> Result<Facilities, LocalError> {
    Err(LocalError::Unsupported {
        os: std::env::consts::OS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientError, ErrorKind};

    #[test]
    fn unsupported_platform_is_explicit() {
        let Err(err) = facilities() else {
            panic!("no backend should be available");
        };
        assert!(err.to_string().contains(std::env::consts::OS));
        assert_eq!(ClientError::from(err).kind(), ErrorKind::Unsupported);
    }
}
