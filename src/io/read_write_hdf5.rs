//! `Hdf5` functions to read and write ndarrays
//!
//! All functions act on an open [`hdf5::Group`] (a [`hdf5::File`] derefs to
//! its root group), dataset names may be paths like `write_000001/sim_time`.
use super::H5Type;
use super::Result;
use ndarray::{Array, Array1, ArrayBase, ArrayD, Dimension};
use num_complex::Complex;
use num_traits::Num;
use std::path::Path;

/// Open a file for appending, create it if it does not exist
///
/// # Errors
/// File cannot be opened or created.
pub fn open_or_create<P: AsRef<Path>>(filename: P) -> Result<hdf5::File> {
    if filename.as_ref().exists() {
        hdf5::File::append(filename)
    } else {
        hdf5::File::create(filename)
    }
}

/// Length of the first dimension of a dataset
///
/// # Errors
/// Dataset does not exist or is zero dimensional.
pub fn get_size_dimension(group: &hdf5::Group, name: &str) -> Result<usize> {
    let dset = group.dataset(name)?;
    dset.shape()
        .first()
        .copied()
        .ok_or_else(|| hdf5::Error::Internal(format!("{} is zero dimensional", name)))
}

/// Read scalar stored as one element array
///
/// # Errors
/// Dataset does not exist or is empty.
pub fn read_scalar<T>(group: &hdf5::Group, name: &str) -> Result<T>
where
    T: H5Type + Copy,
{
    let data: Array1<T> = read_array(group, name)?;
    data.first()
        .copied()
        .ok_or_else(|| hdf5::Error::Internal(format!("{} is empty", name)))
}

/// Write scalar as one element array, overwrite if it exists
///
/// # Errors
/// Dataset cannot be created.
pub fn write_scalar<T>(group: &hdf5::Group, name: &str, scalar: T) -> Result<()>
where
    T: H5Type + Copy,
{
    let x = Array1::<T>::from_elem(1, scalar);
    write_array(group, name, &x)
}

/// Read ndarray of fixed dimensionality
///
/// # Errors
/// Dataset does not exist or has a different dimensionality.
pub fn read_array<A, D>(group: &hdf5::Group, name: &str) -> Result<Array<A, D>>
where
    A: H5Type,
    D: Dimension,
{
    let data = group.dataset(name)?;
    let y: ArrayD<A> = data.read_dyn::<A>()?;
    y.into_dimensionality::<D>()
        .map_err(|e| hdf5::Error::Internal(format!("{}: {}", name, e)))
}

/// Read complex ndarray stored as `{name}_re` and `{name}_im`
///
/// # Errors
/// One of both parts is missing or they differ in shape.
pub fn read_array_complex<A, D>(group: &hdf5::Group, name: &str) -> Result<Array<Complex<A>, D>>
where
    A: H5Type + Num + Clone,
    D: Dimension,
{
    let r = read_array::<A, D>(group, &format!("{}_re", name))?;
    let i = read_array::<A, D>(group, &format!("{}_im", name))?;
    if r.shape() != i.shape() {
        return Err(hdf5::Error::Internal(format!(
            "{}: real and imaginary part differ in shape",
            name
        )));
    }
    let mut array = Array::<Complex<A>, D>::zeros(r.raw_dim());
    let Complex { mut re, mut im } = array.view_mut().split_complex();
    re.assign(&r);
    im.assign(&i);
    Ok(array)
}

/// Write ndarray. An existing dataset of the same shape is overwritten.
///
/// # Errors
/// Dataset exists with a different shape.
pub fn write_array<A, S, D>(group: &hdf5::Group, name: &str, array: &ArrayBase<S, D>) -> Result<()>
where
    A: H5Type,
    S: ndarray::Data<Elem = A>,
    D: Dimension,
{
    let dset = match group.dataset(name) {
        Ok(dset) => dset,
        Err(..) => group
            .new_dataset::<A>()
            .no_chunk()
            .shape(array.shape())
            .create(name)?,
    };
    dset.write(&array.view())?;
    Ok(())
}

/// Write complex ndarray as `{name}_re` and `{name}_im`
///
/// # Errors
/// See [`write_array`].
pub fn write_array_complex<A, S, D>(
    group: &hdf5::Group,
    name: &str,
    array: &ArrayBase<S, D>,
) -> Result<()>
where
    A: H5Type + Copy,
    S: ndarray::Data<Elem = Complex<A>>,
    D: Dimension,
{
    write_array(group, &format!("{}_re", name), &array.map(|x| x.re))?;
    write_array(group, &format!("{}_im", name), &array.map(|x| x.im))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_nested_names_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.h5");
        let file = open_or_create(&path).unwrap();
        write_scalar(&file, "write_000001/sim_time", 0.5).unwrap();
        write_scalar(&file, "records", 1_u64).unwrap();
        write_scalar(&file, "records", 2_u64).unwrap();
        assert!(file.dataset("write_000001/sim_time").is_ok());
        assert!(file.dataset("write_000002/sim_time").is_err());
        drop(file);

        let file = hdf5::File::open(&path).unwrap();
        assert_eq!(read_scalar::<u64>(&file, "records").unwrap(), 2);
        assert!((read_scalar::<f64>(&file, "write_000001/sim_time").unwrap() - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_complex() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_or_create(dir.path().join("c.h5")).unwrap();
        let a: Array2<Complex<f64>> = array![
            [Complex::new(1., 2.), Complex::new(3., -4.)],
            [Complex::new(0., 1.), Complex::new(-1., 0.)]
        ];
        write_array_complex(&file, "tasks/a", &a).unwrap();
        let b = read_array_complex::<f64, ndarray::Ix2>(&file, "tasks/a").unwrap();
        assert_eq!(a, b);
        assert_eq!(get_size_dimension(&file, "tasks/a_re").unwrap(), 2);
    }
}
