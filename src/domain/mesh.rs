//! Process mesh of a two dimensional decomposition
use crate::error::ConfigurationError;
use std::str::FromStr;

/// Logical grid of processes `[p0, p1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessMesh {
    /// Processes along each axis
    pub shape: [usize; 2],
}

impl ProcessMesh {
    /// Resolve an explicit or default mesh for `nprocs` processes.
    ///
    /// Without an explicit shape all processes are placed along the first
    /// axis; the transform engine decomposes into slabs.
    ///
    /// # Errors
    /// Product of the explicit shape differs from `nprocs`, or the
    /// shape is not a slab.
    pub fn resolve(explicit: Option<[usize; 2]>, nprocs: usize) -> Result<Self, ConfigurationError> {
        let shape = explicit.unwrap_or([nprocs, 1]);
        if shape[0] * shape[1] != nprocs {
            return Err(ConfigurationError::MeshMismatch {
                mesh: shape,
                nprocs,
            });
        }
        if shape[1] != 1 {
            return Err(ConfigurationError::UnsupportedMesh(shape));
        }
        Ok(Self { shape })
    }

    /// Total number of processes
    pub fn size(&self) -> usize {
        self.shape[0] * self.shape[1]
    }
}

impl FromStr for ProcessMesh {
    type Err = ConfigurationError;

    /// Parse `p0,p1` (or a single `p`, meaning `p,1`). The product is not
    /// checked here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigurationError::MalformedMesh(s.to_owned());
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<usize>().map_err(|_| malformed()))
            .collect::<Result<Vec<_>, _>>()?;
        let shape = match parts.as_slice() {
            [p0] => [*p0, 1],
            [p0, p1] => [*p0, *p1],
            _ => return Err(malformed()),
        };
        if shape.contains(&0) {
            return Err(malformed());
        }
        Ok(Self { shape })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mesh() {
        let mesh = ProcessMesh::resolve(None, 4).unwrap();
        assert_eq!(mesh.shape, [4, 1]);
        assert_eq!(mesh.size(), 4);
    }

    #[test]
    fn test_mismatch() {
        let err = ProcessMesh::resolve(Some([2, 3]), 4).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MeshMismatch { mesh: [2, 3], nprocs: 4 }
        ));
    }

    #[test]
    fn test_unsupported_pencil() {
        let err = ProcessMesh::resolve(Some([2, 2]), 4).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnsupportedMesh([2, 2])));
    }

    #[test]
    fn test_parse() {
        assert_eq!("4,1".parse::<ProcessMesh>().unwrap().shape, [4, 1]);
        assert_eq!("2".parse::<ProcessMesh>().unwrap().shape, [2, 1]);
        assert!("2,x".parse::<ProcessMesh>().is_err());
        assert!("0,1".parse::<ProcessMesh>().is_err());
        assert!("1,2,3".parse::<ProcessMesh>().is_err());
    }
}
