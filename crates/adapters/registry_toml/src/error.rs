//! Registry file error types.

use std::path::PathBuf;

use vconnector_domain::error::ConnectorError;

/// Errors specific to the TOML registry adapter.
#[derive(Debug, thiserror::Error)]
pub enum RegistryFileError {
    /// The definitions file could not be read.
    #[error("failed to read registry file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The definitions file is not valid TOML for the registry schema.
    #[error("failed to parse registry file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl From<RegistryFileError> for ConnectorError {
    fn from(err: RegistryFileError) -> Self {
        ConnectorError::Registry(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn should_display_path_of_unreadable_file() {
        let err = RegistryFileError::Read {
            path: PathBuf::from("/etc/devices.toml"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.to_string(), "failed to read registry file /etc/devices.toml");
        assert!(err.source().is_some());
    }

    #[test]
    fn should_convert_into_registry_error() {
        let toml_err = toml::from_str::<toml::Table>("devices = [").unwrap_err();
        let err: ConnectorError = RegistryFileError::Parse {
            path: PathBuf::from("devices.toml"),
            source: toml_err,
        }
        .into();
        assert!(matches!(err, ConnectorError::Registry(_)));
    }
}
