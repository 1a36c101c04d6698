//! Background work for the cache: the evictor thread that enforces the
//! capacity bound off the caller's path.

pub(crate) mod evictor;
