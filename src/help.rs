//! Static `HELP` text (spec §6.1 command table).

pub struct CommandHelp {
    pub name: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
    pub threaded: bool,
}

pub const COMMANDS: &[CommandHelp] = &[
    CommandHelp {
        name: "VERSION",
        usage: "VERSION",
        summary: "Returns the build version.",
        threaded: false,
    },
    CommandHelp {
        name: "OPEN",
        usage: "OPEN <ep> [<ep>...]",
        summary: "Select reader endpoints for this session.",
        threaded: false,
    },
    CommandHelp {
        name: "USING",
        usage: "USING <ep> [<ep>...]",
        summary: "Like OPEN, but create writable endpoints as needed.",
        threaded: false,
    },
    CommandHelp {
        name: "CREATE",
        usage: "CREATE <ep>",
        summary: "Create a single writable endpoint and select it.",
        threaded: false,
    },
    CommandHelp {
        name: "REOPEN",
        usage: "REOPEN",
        summary: "Force the next read to observe the latest commit.",
        threaded: false,
    },
    CommandHelp {
        name: "INDEX",
        usage: "INDEX <json>",
        summary: "Queue an upsert.",
        threaded: false,
    },
    CommandHelp {
        name: "CINDEX",
        usage: "CINDEX <json>",
        summary: "Queue an upsert, committing afterward.",
        threaded: false,
    },
    CommandHelp {
        name: "DELETE",
        usage: "DELETE <id>",
        summary: "Queue a delete.",
        threaded: false,
    },
    CommandHelp {
        name: "CDELETE",
        usage: "CDELETE <id>",
        summary: "Queue a delete, committing afterward.",
        threaded: false,
    },
    CommandHelp {
        name: "COMMIT",
        usage: "COMMIT",
        summary: "Queue a commit for every selected endpoint.",
        threaded: false,
    },
    CommandHelp {
        name: "SEARCH",
        usage: "SEARCH <query>",
        summary: "Full results; match rows include data.",
        threaded: true,
    },
    CommandHelp {
        name: "FIND",
        usage: "FIND <query>",
        summary: "Matches without data.",
        threaded: true,
    },
    CommandHelp {
        name: "TERMS",
        usage: "TERMS <query>",
        summary: "Matches with term lists.",
        threaded: true,
    },
    CommandHelp {
        name: "FACETS",
        usage: "FACETS <query>",
        summary: "Facet rows only.",
        threaded: true,
    },
    CommandHelp {
        name: "COUNT",
        usage: "COUNT [<query>]",
        summary: "Count of matches; with no query returns the endpoint's doccount.",
        threaded: true,
    },
    CommandHelp {
        name: "ENDPOINTS",
        usage: "ENDPOINTS",
        summary: "List the current session's selected endpoints.",
        threaded: false,
    },
    CommandHelp {
        name: "HELP",
        usage: "HELP [<cmd>]",
        summary: "Documentation strings, for one command or all of them.",
        threaded: false,
    },
    CommandHelp {
        name: "QUIT",
        usage: "QUIT",
        summary: "Say >> BYE! and close the connection.",
        threaded: false,
    },
];

/// Looks a command up by name, case-insensitively; `EXIT` is an alias
/// for `QUIT`.
pub fn find(name: &str) -> Option<&'static CommandHelp> {
    let upper = name.to_ascii_uppercase();
    COMMANDS
        .iter()
        .find(|c| c.name == upper || (c.name == "QUIT" && upper == "EXIT"))
}
