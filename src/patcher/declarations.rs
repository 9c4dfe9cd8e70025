//! Declaration and prototype fixes
//!
//! Small rewrites that add missing prototypes and includes, demote duplicate
//! definitions to `extern`, and repair mismatched arguments that old compilers
//! accepted silently.

use super::{bytes, WorkingTree};
use crate::error::Result;
use regex::bytes::Regex;
use std::sync::LazyLock;

const ERROR_PROTOTYPE: &[u8] = b"void Error(char *fmt, ...);";

/// Insert an `Error` prototype ahead of `yyerror` in `error.c`
///
/// `yyerror` calls `Error`, which is defined further down the file. Once
/// `Error` is variadic the call needs a prototype in scope.
pub fn add_error_prototype(tree: &mut WorkingTree) -> Result<()> {
    tree.rewrite_file("error.c", |src| {
        if bytes::contains(src, ERROR_PROTOTYPE) {
            return None;
        }
        let error_pos = bytes::find(src, b"\nvoid\nError(char *fmt, ...)")
            .or_else(|| bytes::find(src, b"\nError(char *fmt, ...)"))?;
        let yyerror_pos = bytes::find(src, b"\nvoid\nyyerror(msg)")
            .or_else(|| bytes::find(src, b"\nint\nyyerror(msg)"))
            .or_else(|| bytes::find(src, b"\nyyerror(msg)"))?;
        if error_pos < yyerror_pos {
            return None;
        }
        let prototype = bytes::join(&[b"\n", ERROR_PROTOTYPE, b"\n"]);
        Some(bytes::insert_at(src, yyerror_pos, &prototype))
    })?;
    Ok(())
}

static SCOPE_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m-u)^(struct SCOPE \{[^}]*\} \*the_scope;)").expect("valid regex")
});

/// Turn globals defined in more than one translation unit into `extern`s
pub fn deduplicate_vars(tree: &mut WorkingTree) -> Result<()> {
    tree.rewrite_file("range.c", |src| {
        let out = bytes::replace_all(src, b"\nVALUE M_Comparable;", b"\nextern VALUE M_Comparable;");
        Some(bytes::replace_all(&out, b"\nVALUE mComparable;", b"\nextern VALUE mComparable;"))
    })?;
    tree.rewrite_file("object.c", |src| {
        Some(bytes::replace_all(src, b"\nVALUE cFixnum;", b"\nextern VALUE cFixnum;"))
    })?;
    tree.rewrite_file("env.h", |src| {
        Some(SCOPE_DEFINITION.replace_all(src, &b"extern ${1}"[..]).into_owned())
    })?;
    Ok(())
}

/// Replace the hand-written `alloca` prototype with the system header
pub fn fix_alloca_prototype(tree: &mut WorkingTree) -> Result<()> {
    for file in ["glob.c", "gnuglob.c"] {
        tree.rewrite_file(file, |src| {
            Some(bytes::replace_all(src, b"char *alloca ();", b"#include <alloca.h>"))
        })?;
    }
    Ok(())
}

/// Make `errno` declared in `error.c`
pub fn fix_errno_decl(tree: &mut WorkingTree) -> Result<()> {
    tree.rewrite_file("error.c", |src| {
        if bytes::contains(src, b"#include \"errno.h\";")
            || bytes::contains(src, b"#include <errno.h>;")
        {
            return None;
        }
        Some(bytes::join(&[b"#include <errno.h>;\n", src]))
    })?;
    Ok(())
}

/// Replace the `sys_nerr` declaration, which modern libcs no longer export
pub fn fix_sys_nerr(tree: &mut WorkingTree) -> Result<()> {
    tree.rewrite_file("error.c", |src| {
        Some(bytes::replace_all(src, b"\nextern int sys_nerr;", b"\n#define sys_nerr 256"))
    })?;
    Ok(())
}

/// Point `va_end` in struct.c at the `args` list it actually started.
pub fn fix_struct_va_end(tree: &mut WorkingTree) -> Result<()> {
    tree.rewrite_file("struct.c", |src| {
        Some(bytes::replace_all(src, b"va_end(vargs)", b"va_end(args)"))
    })?;
    Ok(())
}

static RE_MATCH_2_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)re_match_2 \((.*?), size\)").expect("valid regex"));

/// Drop the surplus trailing `size` argument from `re_match_2` calls
pub fn fix_re_match_2(tree: &mut WorkingTree) -> Result<()> {
    tree.rewrite_file("regex.c", |src| {
        Some(RE_MATCH_2_CALL.replace_all(src, &b"re_match_2 (${1})"[..]).into_owned())
    })?;
    Ok(())
}

/// Include `<time.h>` right after `<sys/time.h>` in `time.c`
pub fn include_time_header(tree: &mut WorkingTree) -> Result<()> {
    const SYS_TIME: &[u8] = b"#include <sys/time.h>\n";

    tree.rewrite_file("time.c", |src| {
        if bytes::contains(src, b"#include <time.h>") {
            return None;
        }
        let pos = bytes::find(src, SYS_TIME)? + SYS_TIME.len();
        Some(bytes::insert_at(src, pos, b"#include <time.h>\n"))
    })?;
    Ok(())
}
