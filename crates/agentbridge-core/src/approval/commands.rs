//! Command vocabularies used when turning shell commands into prefixes.

/// Read-only prefixes that never need a prompt.
const SAFE_PREFIXES: &[&str] = &[
    "git blame",
    "git branch",
    "git cat-file",
    "git describe",
    "git diff",
    "git log",
    "git ls-files",
    "git ls-tree",
    "git reflog",
    "git remote",
    "git rev-parse",
    "git show",
    "git shortlog",
    "git status",
    "git symbolic-ref",
    "git tag",
    "gh issue list",
    "gh issue view",
    "gh pr checks",
    "gh pr diff",
    "gh pr list",
    "gh pr status",
    "gh pr view",
    "gh repo view",
];

/// Programs whose first argument is an operand, not a subcommand. Their
/// prefix is the program name alone. Package managers and build tools with
/// subcommands (`npm`, `cargo`, `go`, ...) are deliberately absent.
const OPERAND_COMMANDS: &[&str] = &[
    // shell builtins
    "alias", "cd", "command", "echo", "eval", "exit", "export", "printf", "pwd", "set",
    "source", "test", "type", "unset", "which",
    // shells and interpreters
    "bash", "bun", "deno", "fish", "java", "node", "perl", "php", "python", "python3",
    "ruby", "sh", "zsh",
    // files
    "basename", "cat", "chmod", "chown", "cp", "dirname", "file", "find", "head", "less",
    "ln", "ls", "mkdir", "more", "mv", "readlink", "realpath", "rm", "rmdir", "stat",
    "tail", "tee", "touch", "xargs",
    // text
    "awk", "cut", "diff", "grep", "jq", "patch", "rg", "sed", "sort", "tr", "uniq", "wc",
    "yq",
    // system
    "date", "env", "kill", "pkill", "ps", "sleep", "timeout", "uname", "whoami",
    // network and archives
    "curl", "rsync", "scp", "ssh", "tar", "unzip", "wget", "zip",
    // compilers
    "clang", "cmake", "gcc", "make", "rustc",
];

pub fn is_safe_prefix(prefix: &str) -> bool {
    SAFE_PREFIXES.contains(&prefix)
}

pub fn takes_operand(program: &str) -> bool {
    OPERAND_COMMANDS.contains(&program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_git_is_safe() {
        assert!(is_safe_prefix("git status"));
        assert!(is_safe_prefix("gh pr view"));
        assert!(!is_safe_prefix("git push"));
        assert!(!is_safe_prefix("git"));
    }

    #[test]
    fn package_managers_have_subcommands() {
        assert!(takes_operand("ls"));
        assert!(!takes_operand("npm"));
        assert!(!takes_operand("cargo"));
    }
}
