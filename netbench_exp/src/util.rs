use std::path::Path;

#[macro_export]
macro_rules! args {
    ($($element:expr),*) => {{
        #[allow(unused_mut)]
        let mut vs = Vec::new();
        $(vs.push($element.to_string());)*
        vs
    }};
    ($($element:expr,)*) => {{
        $crate::args![$($element),*]
    }};
}

/// Turns `name` into something usable as a tmux window name: tmux treats `.`
/// and `:` as target separators.
pub fn pane_name(name: impl AsRef<str>) -> String {
    name.as_ref()
        .chars()
        .map(|c| match c {
            '.' | ':' | ' ' => '_',
            c => c,
        })
        .collect()
}

/// Joins paths into a single space-separated argument list.
pub fn join_paths<P: AsRef<Path>>(paths: &[P]) -> String {
    paths
        .iter()
        .map(|path| path.as_ref().display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_test() {
        let port = 1234;
        assert_eq!(args!["--port", port], vec!["--port", "1234"]);
        let empty: Vec<String> = args![];
        assert!(empty.is_empty());
    }

    #[test]
    fn pane_name_test() {
        assert_eq!(pane_name("run1.5:server vm0"), "run1_5_server_vm0");
        assert_eq!(pane_name("client_savelogs"), "client_savelogs");
    }

    #[test]
    fn join_paths_test() {
        assert_eq!(join_paths(&["a/out.log", "b.log"]), "a/out.log b.log");
    }
}
