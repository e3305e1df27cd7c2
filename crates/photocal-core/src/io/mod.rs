pub mod fits;
pub mod fits_writer;
