//! Interactive `Resolver`: presents one conflict at a time via
//! `dialoguer::Select`, with an `inspect` option that shells out to
//! `$PAGER` (falling back to `less`/`more`) for each side before asking
//! again.

use std::path::Path;
use std::process::Command;

use dialoguer::Select;
use treemerge_core::resolver::{Candidate, Resolver};
use treemerge_core::Choice;

pub struct InteractiveResolver;

const OPTIONS: &[&str] = &[
    "Prefer newer (by mtime)",
    "Prefer older (by mtime)",
    "Inspect side A, then choose",
    "Inspect side B, then choose",
];

impl Resolver for InteractiveResolver {
    fn resolve(&self, candidate: &Candidate) -> Choice {
        let mut inspected = false;
        loop {
            eprintln!();
            eprintln!("conflict: {}", candidate.rel_path);
            eprintln!(
                "  a: {} ({} bytes, mtime {:?})",
                candidate.abs_a.display(),
                candidate.a.size.map_or("?".to_string(), |s| s.to_string()),
                candidate.a.mtime,
            );
            eprintln!(
                "  b: {} ({} bytes, mtime {:?})",
                candidate.abs_b.display(),
                candidate.b.size.map_or("?".to_string(), |s| s.to_string()),
                candidate.b.mtime,
            );

            let choice_idx = Select::new()
                .with_prompt("resolution")
                .items(OPTIONS)
                .default(0)
                .interact_opt();

            let Ok(Some(idx)) = choice_idx else {
                // Ctrl-C / EOF during the prompt: the caller treats a
                // ResolverAborted-style interruption as graceful shutdown,
                // but this trait has no error channel, so fall back to the
                // conservative prefer-newer default rather than hang.
                return Choice::PreferNewer;
            };

            match idx {
                0 if inspected => return Choice::InspectThenNewer,
                0 => return Choice::PreferNewer,
                1 if inspected => return Choice::InspectThenOlder,
                1 => return Choice::PreferOlder,
                2 => {
                    inspect(&candidate.abs_a);
                    inspected = true;
                }
                3 => {
                    inspect(&candidate.abs_b);
                    inspected = true;
                }
                _ => unreachable!("Select::interact_opt only returns indices into OPTIONS"),
            }
        }
    }
}

fn inspect(path: &Path) {
    if path.is_dir() {
        eprintln!("{} is a directory", path.display());
        return;
    }
    let pager = std::env::var("PAGER").unwrap_or_else(|_| "less".to_owned());
    let status = Command::new(&pager).arg(path).status();
    if let Err(err) = status {
        eprintln!("failed to launch pager '{pager}': {err}");
    }
}
