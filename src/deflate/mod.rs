//! Module for reading and writing DEFLATE streams. Streams are read in as a vector of blocks containing tokens
//! which can be written back out as an identical DEFLATE stream.

pub mod bit_reader;
pub mod bit_writer;

pub mod deflate_constants;

pub mod deflate_reader;
pub mod deflate_token;
pub mod deflate_writer;
pub mod huffman_encoding;
