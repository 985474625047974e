//! `Hdf5` functions to write and read slices of ndarray datasets
use super::H5Type;
use super::Result;
use num_complex::Complex;
use std::convert::TryFrom;

/// Write an array into a slice of a dataset. Supply the full shape of
/// the dataset and the slice where to put it. Array and slice shapes
/// must be smaller than the full shape.
///
/// The dataset is created with `full_shape` if it does not exist.
///
/// # Errors
/// Dimensionality of `array` and `full_shape` differ, or the dataset
/// exists with a different shape.
pub fn write_slice<A, S, D, T, Sh>(
    group: &hdf5::Group,
    name: &str,
    array: &ndarray::ArrayBase<S, D>,
    slice: ndarray::SliceInfo<T, D, D>,
    full_shape: Sh,
) -> Result<()>
where
    A: H5Type,
    S: ndarray::Data<Elem = A>,
    D: ndarray::Dimension,
    T: AsRef<[ndarray::SliceInfoElem]>,
    Sh: Into<hdf5::Extents>,
{
    let full_shape = full_shape.into();
    if array.ndim() != full_shape.ndim() {
        return Err(hdf5::Error::Internal(format!(
            "{}: dimension mismatch of array and full shape, {} vs. {}",
            name,
            array.ndim(),
            full_shape.ndim()
        )));
    }
    let dset = match group.dataset(name) {
        Ok(dset) => dset,
        Err(..) => group
            .new_dataset::<A>()
            .no_chunk()
            .shape(full_shape)
            .create(name)?,
    };
    dset.write_slice(array, hdf5::Hyperslab::try_from(slice)?)?;
    Ok(())
}

/// Complex version of [`write_slice`], writes `{name}_re` and `{name}_im`
///
/// # Errors
/// See [`write_slice`].
pub fn write_slice_complex<A, S, D, T, Sh>(
    group: &hdf5::Group,
    name: &str,
    array: &ndarray::ArrayBase<S, D>,
    slice: ndarray::SliceInfo<T, D, D>,
    full_shape: Sh,
) -> Result<()>
where
    A: H5Type + Copy,
    S: ndarray::Data<Elem = Complex<A>>,
    D: ndarray::Dimension,
    T: AsRef<[ndarray::SliceInfoElem]>,
    Sh: Into<hdf5::Extents> + Copy,
    ndarray::SliceInfo<T, D, D>: Copy,
{
    write_slice(group, &format!("{}_re", name), &array.map(|x| x.re), slice, full_shape)?;
    write_slice(group, &format!("{}_im", name), &array.map(|x| x.im), slice, full_shape)?;
    Ok(())
}

/// Read a slice of a dataset
fn read_slice<A, D, T>(
    group: &hdf5::Group,
    name: &str,
    slice: ndarray::SliceInfo<T, D, D>,
) -> Result<ndarray::Array<A, D>>
where
    A: H5Type,
    D: ndarray::Dimension,
    T: AsRef<[ndarray::SliceInfoElem]>,
{
    let data = group.dataset(name)?;
    let y: ndarray::ArrayD<A> = data.read_slice(hdf5::Hyperslab::try_from(slice)?)?;
    y.into_dimensionality::<D>()
        .map_err(|e| hdf5::Error::Internal(format!("{}: {}", name, e)))
}

/// Read a slice of a complex dataset stored as `_re` and `_im` parts
///
/// # Errors
/// Dataset does not exist or the slice is out of bounds.
pub fn read_slice_complex<A, D, T>(
    group: &hdf5::Group,
    name: &str,
    slice: ndarray::SliceInfo<T, D, D>,
) -> Result<ndarray::Array<Complex<A>, D>>
where
    A: H5Type + Clone + num_traits::Num,
    D: ndarray::Dimension,
    T: AsRef<[ndarray::SliceInfoElem]>,
    ndarray::SliceInfo<T, D, D>: Copy,
{
    let r = read_slice::<A, D, T>(group, &format!("{}_re", name), slice)?;
    let i = read_slice::<A, D, T>(group, &format!("{}_im", name), slice)?;
    let mut array = ndarray::Array::<Complex<A>, D>::zeros(r.raw_dim());
    let Complex { mut re, mut im } = array.view_mut().split_complex();
    re.assign(&r);
    im.assign(&i);
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read_write_hdf5::{open_or_create, read_array};
    use ndarray::{s, Array2, Array3, Axis};

    #[test]
    fn test_assemble_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_or_create(dir.path().join("s.h5")).unwrap();
        let top = Array2::<f64>::from_elem((2, 3), 1.);
        let bottom = Array2::<f64>::from_elem((2, 3), 2.);
        for (r, (block, st)) in [(&top, 0_usize), (&bottom, 2_usize)].iter().enumerate() {
            let view = block.view().insert_axis(Axis(0));
            write_slice(&file, "v", &view, s![r..r + 1, *st..*st + 2, ..], &[2_usize, 4, 3]).unwrap();
        }
        let full: Array3<f64> = read_array(&file, "v").unwrap();
        assert_eq!(full[[0, 1, 2]], 1.);
        assert_eq!(full[[1, 3, 0]], 2.);
        assert_eq!(full[[0, 3, 0]], 0.);
        let part: Array3<f64> = read_slice(&file, "v", s![1..2, 2..4, ..]).unwrap();
        assert!(part.iter().all(|x| (*x - 2.).abs() < 1e-15));
    }
}
