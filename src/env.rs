//! `BLOSC_*` environment-variable overrides.
//!
//! Each override is resolved once per call, at the public entry point that
//! builds an effective [`crate::context::Cparams`]/[`crate::context::Dparams`]
//! pair, never cached, since the contract is "for the duration of that call
//! only". An out-of-range value fails the call rather than silently
//! clamping.

use crate::context::{Cparams, Dparams};
use crate::error::{BcError, BcResult};
use crate::filters::Filter;
use std::str::FromStr;

fn parse_var<T: FromStr>(name: &str) -> BcResult<Option<T>> {
    match std::env::var(name) {
        Ok(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| BcError::InvalidParam(format!("{name}={v} is not valid"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(BcError::InvalidParam(format!("{name} is not valid unicode")))
        }
    }
}

/// Applies `BLOSC_CLEVEL`, `BLOSC_SHUFFLE`, `BLOSC_DELTA`, `BLOSC_TYPESIZE`,
/// `BLOSC_COMPRESSOR`, `BLOSC_NTHREADS`, and `BLOSC_BLOCKSIZE` on top of
/// `base`, returning the effective parameters for this call.
pub fn effective_cparams(base: &Cparams) -> BcResult<Cparams> {
    let mut out = base.clone();

    if let Some(clevel) = parse_var::<u8>("BLOSC_CLEVEL")? {
        if clevel > 9 {
            return Err(BcError::InvalidParam(format!(
                "BLOSC_CLEVEL={clevel} out of range 0..=9"
            )));
        }
        out.clevel = clevel;
    }

    if let Ok(shuffle) = std::env::var("BLOSC_SHUFFLE") {
        let filter = match shuffle.as_str() {
            "NOSHUFFLE" => None,
            "SHUFFLE" => Some(Filter::Shuffle),
            "BITSHUFFLE" => Some(Filter::Bitshuffle),
            other => {
                return Err(BcError::InvalidParam(format!(
                    "BLOSC_SHUFFLE={other} not one of NOSHUFFLE/SHUFFLE/BITSHUFFLE"
                )))
            }
        };
        out.filters.retain(|f| !matches!(f, Filter::Shuffle | Filter::Bitshuffle));
        if let Some(f) = filter {
            out.filters.insert(0, f);
        }
    }

    if let Some(delta) = parse_var::<u8>("BLOSC_DELTA")? {
        out.filters.retain(|f| !matches!(f, Filter::Delta));
        match delta {
            0 => {}
            1 => out.filters.push(Filter::Delta),
            other => {
                return Err(BcError::InvalidParam(format!(
                    "BLOSC_DELTA={other} must be 0 or 1"
                )))
            }
        }
    }

    if let Some(typesize) = parse_var::<u8>("BLOSC_TYPESIZE")? {
        if typesize == 0 {
            return Err(BcError::InvalidParam("BLOSC_TYPESIZE=0 is invalid".into()));
        }
        out.typesize = typesize as usize;
    }

    if let Ok(name) = std::env::var("BLOSC_COMPRESSOR") {
        out.codec = crate::codecs::Codec::by_name(&name).ok_or_else(|| {
            BcError::InvalidParam(format!("BLOSC_COMPRESSOR={name} is not a known codec"))
        })?;
    }

    if let Some(nthreads) = parse_var::<u16>("BLOSC_NTHREADS")? {
        if nthreads == 0 {
            return Err(BcError::InvalidParam("BLOSC_NTHREADS=0 is invalid".into()));
        }
        out.nthreads = nthreads;
    }

    if let Some(blocksize) = parse_var::<u32>("BLOSC_BLOCKSIZE")? {
        if blocksize as usize > crate::constants::MAX_BLOCKSIZE {
            return Err(BcError::InvalidParam(format!(
                "BLOSC_BLOCKSIZE={blocksize} exceeds MAX_BLOCKSIZE"
            )));
        }
        out.blocksize = blocksize as usize;
    }

    if let Some(nolock) = parse_var::<u8>("BLOSC_NOLOCK")? {
        out.nolock = match nolock {
            0 => false,
            1 => true,
            other => {
                return Err(BcError::InvalidParam(format!(
                    "BLOSC_NOLOCK={other} must be 0 or 1"
                )))
            }
        };
    }

    if let Some(compat) = parse_var::<u8>("BLOSC_BLOSC1_COMPAT")? {
        out.blosc1_compat = match compat {
            0 => false,
            1 => true,
            other => {
                return Err(BcError::InvalidParam(format!(
                    "BLOSC_BLOSC1_COMPAT={other} must be 0 or 1"
                )))
            }
        };
    }

    Ok(out)
}

/// Applies `BLOSC_NTHREADS` on top of `base` for decompression contexts.
pub fn effective_dparams(base: &Dparams) -> BcResult<Dparams> {
    let mut out = base.clone();
    if let Some(nthreads) = parse_var::<u16>("BLOSC_NTHREADS")? {
        if nthreads == 0 {
            return Err(BcError::InvalidParam("BLOSC_NTHREADS=0 is invalid".into()));
        }
        out.nthreads = nthreads;
    }
    Ok(out)
}
