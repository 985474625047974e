//! # Input / Output
//! Thin helpers around `hdf5` for ndarrays. Complex arrays are stored as
//! two real datasets with suffixes `_re` and `_im`.
pub mod read_write_hdf5;
pub mod read_write_slice_hdf5;
pub use hdf5::{H5Type, Result};
pub use read_write_hdf5::{
    get_size_dimension, open_or_create, read_array, read_array_complex, read_scalar,
    write_array, write_array_complex, write_scalar,
};
pub use read_write_slice_hdf5::{read_slice_complex, write_slice, write_slice_complex};
