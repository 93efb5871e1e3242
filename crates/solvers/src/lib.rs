//! Pure building blocks of the output dispute game: the bisection geometry over a block range
//! and the challenge status machine. Nothing in this crate performs I/O.

pub mod challenge;
