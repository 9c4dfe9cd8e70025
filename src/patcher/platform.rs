//! Platform detection fixes
//!
//! These rules adjust feature probes and conditional compilation that were
//! written against early-90s libc and autoconf behavior.

use super::{bytes, WorkingTree};
use crate::error::Result;
use regex::bytes::Regex;
use std::sync::LazyLock;

static DIRENT_PROBE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)AC_HAVE_HEADERS\([^)]*?dirent\.h\)").expect("valid regex")
});

/// Switch `gnuglob.c` to the `DIRENT` macro when configure never probes for
/// `dirent.h`
///
/// Without the probe `HAVE_DIRENT_H` is never defined, while `DIRENT` is set
/// by the older `AC_DIR_HEADER` check.
pub fn fix_dirent_conf(tree: &mut WorkingTree) -> Result<()> {
    let Some(conf) = tree.read("configure.in")? else {
        return Ok(());
    };
    if DIRENT_PROBE.is_match(&conf) {
        return Ok(());
    }
    tree.rewrite_file("gnuglob.c", |src| {
        Some(bytes::replace_all(
            src,
            b"#if defined (HAVE_DIRENT_H)",
            b"#if defined (DIRENT)",
        ))
    })?;
    Ok(())
}

/// Give the `pow()` probe in `configure` real arguments
///
/// Modern compilers constant-fold or reject the argument-less call, so the
/// probe never links against libm.
pub fn fix_pow_detection(tree: &mut WorkingTree) -> Result<()> {
    tree.rewrite_file("configure", |src| {
        Some(bytes::replace_all(src, b"pow()", b"pow(1.0, 1.0)"))
    })?;
    Ok(())
}

static SWITCHED_GPTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m-u)^#\s*if 1\n[^\n]*->_gptr").expect("valid regex")
});

/// Make `io.c` use the libio buffer fields for pending-input checks
pub fn fix_stdio_pending(tree: &mut WorkingTree) -> Result<()> {
    tree.rewrite_file("io.c", |src| {
        if bytes::contains(src, b"ifdef _STDIO_USES_IOSTREAM") {
            let out = bytes::replace_all(src, b"ifdef _STDIO_USES_IOSTREAM", b"if 1");
            let out = bytes::replace_all(&out, b"ifdef _IO_fpos_t", b"if 1");
            return Some(bytes::replace_all(&out, b"ifdef _other_gbase", b"if 1"));
        }
        // Already on libio names, or the guards were switched by an earlier run
        if bytes::contains(src, b"_STDIO_USES_IOSTREAM")
            || bytes::contains(src, b"->_IO_read_ptr")
            || SWITCHED_GPTR.is_match(src)
        {
            return None;
        }
        let out = bytes::replace_all(src, b"->_gptr", b"->_IO_read_ptr");
        Some(bytes::replace_all(&out, b"->_egptr", b"->_IO_read_end"))
    })?;
    Ok(())
}
