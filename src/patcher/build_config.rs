//! Build configuration fixes
//!
//! Rewrites of `configure`, `configure.in`, and the Makefile templates so the
//! reconstructed tree configures and links on a current toolchain.

use super::{bytes, WorkingTree};
use crate::error::Result;
use regex::bytes::Regex;
use std::sync::LazyLock;

/// Build the dbm extension with the configured compiler
pub fn fix_dbmcc(tree: &mut WorkingTree) -> Result<()> {
    tree.rewrite_file("Makefile.in", |src| {
        Some(bytes::replace_all(src, b"DBMCC = cc", b"DBMCC = @CC@"))
    })?;
    Ok(())
}

/// Link extensions through the compiler driver
pub fn fix_ldshared(tree: &mut WorkingTree) -> Result<()> {
    tree.rewrite_file("ext/extmk.rb.in", |src| {
        Some(bytes::replace_all(
            src,
            b"LDSHARED = @LDSHARED@",
            b"LDSHARED = @CC@ -shared",
        ))
    })?;
    Ok(())
}

/// Provide a stub `ext/Makefile.in` when `configure` expects one that the
/// release never shipped
pub fn fix_missing_ext_makefile(tree: &mut WorkingTree) -> Result<()> {
    let Some(configure) = tree.read("configure")? else {
        return Ok(());
    };
    if bytes::contains(&configure, b"ext/Makefile") && !tree.exists("ext/Makefile.in") {
        tree.create_dir_all("ext")?;
        tree.write("ext/Makefile.in", b"all:\n")?;
    }
    Ok(())
}

/// Follow the `cons.c` to `assoc.c` rename in `Makefile.in`
pub fn fix_renamed_cons(tree: &mut WorkingTree) -> Result<()> {
    if !tree.exists("assoc.c") || tree.exists("cons.c") {
        return Ok(());
    }
    tree.rewrite_file("Makefile.in", |src| {
        let out = bytes::replace_all(src, b"cons.o", b"assoc.o");
        Some(bytes::replace_all(&out, b"cons.c", b"assoc.c"))
    })?;
    Ok(())
}

static HAVE_LIBRARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)AC_HAVE_LIBRARY\(.*\)\n").expect("valid regex"));
static FI_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m-u)^fi$").expect("valid regex"));

const CRYPT_CHECK_LIB: &[u8] = b"AC_CHECK_LIB(crypt, [LIBS=\"$LIBS -lcrypt\"])\n";

const CRYPT_PROBE: &[u8] = br#"
LIBS_save="${LIBS}"
LIBS="${LIBS} -lcrypt"
have_lib=""
echo checking for -lcrypt
cat > conftest.c <<EOF
#include "confdefs.h"

int main() { exit(0); }
int t() { main(); }
EOF
if eval $compile; then
  rm -rf conftest*
  have_lib="1"

fi
rm -f conftest*
LIBS="${LIBS_save}"
if test -n "${have_lib}"; then
    :; LIBS="$LIBS -lcrypt"
else
    :;
fi
"#;

/// Link against libcrypt, which glibc split out of libc
///
/// Adds the check to `configure.in` after the last library probe, and an
/// equivalent hand-expanded probe to the generated `configure` after the
/// block holding its last `LIBS` assignment.
pub fn use_crypt(tree: &mut WorkingTree) -> Result<()> {
    tree.rewrite_file("configure.in", |src| {
        if bytes::contains(src, b"-lcrypt") || bytes::contains(src, b"AC_CHECK_LIB(crypt") {
            return None;
        }
        let last = HAVE_LIBRARY.find_iter(src).last()?;
        Some(bytes::insert_at(src, last.end(), CRYPT_CHECK_LIB))
    })?;

    tree.rewrite_file("configure", |src| {
        if bytes::contains(src, b"-lcrypt") {
            return None;
        }
        let last_libs = bytes::rfind(src, b"LIBS=\"$LIBS ")?;
        let fi = FI_LINE.find_at(src, last_libs)?;
        // Past the newline ending the `fi` line
        let pos = (fi.end() + 1).min(src.len());
        Some(bytes::insert_at(src, pos, CRYPT_PROBE))
    })?;
    Ok(())
}

/// Use the gdbm compatibility library in place of the long-gone libdbm
pub fn use_gdbm_compat(tree: &mut WorkingTree) -> Result<()> {
    for file in ["configure", "configure.in"] {
        tree.rewrite_file(file, |src| {
            Some(bytes::replace_all(src, b"-ldbm", b"-lgdbm_compat"))
        })?;
    }
    Ok(())
}
