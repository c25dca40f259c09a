//! Stream resynchronization — find the next trustworthy record boundary.
//!
//! # How it works
//!
//! Every SYNC and REBOOT record carries `SYNC_MAJIK` at a fixed offset.
//! After a framing failure the resynchronizer walks the stream one quad at a
//! time looking for that signature, backs up to where the enclosing record
//! would start, and accepts the spot only if the header found there has the
//! SYNC or REBOOT type *and* that type's exact registered length.  The
//! checksum is left for the record reader, which re-runs every check.
//!
//! A majik value inside unrelated payload is cheap to reject: the
//! type/length test fails and the scan resumes just past it.
//!
//! ## Termination
//!
//! | condition | outcome |
//! |-----------|---------|
//! | plausible SYNC/REBOOT header | `Ok(offset)`, source positioned there |
//! | more than `max_zero_sigs` zero quads in a row | `ResyncExhausted(TooManyZeroWords)` |
//! | short read, end of data, I/O error | `ResyncExhausted(..)` |
//! | SYNC or REBOOT not registered | `ResyncUnsupported` |
//!
//! There is no retry inside the resynchronizer; every failure is final for
//! the read loop.

mod resync;

pub use resync::Resynchronizer;
