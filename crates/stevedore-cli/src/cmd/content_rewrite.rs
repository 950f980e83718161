use stevedore_core::cancel::CancellationToken;
use stevedore_core::id::{ContentId, ContentIdRange};
use stevedore_core::maintenance::{rewrite_contents, RewriteContentsOptions, SafetyParameters};

use crate::cli::ContentCommand;

use super::{open_repository, CmdResult};

pub(crate) fn run(repo: &str, command: &ContentCommand, cancel: &CancellationToken) -> CmdResult {
    match command {
        ContentCommand::Rewrite {
            ids,
            parallelism,
            short_packs,
            format_version,
            pack_prefix,
            content_id_range_min,
            content_id_range_max,
            dry_run,
            safety,
        } => {
            let safety: SafetyParameters = safety.parse()?;
            let rep = open_repository(repo)?;

            let content_id_range = match (content_id_range_min, content_id_range_max) {
                (None, None) => None,
                (min, max) => Some(ContentIdRange {
                    min: ContentId::new(min.as_deref().unwrap_or("")),
                    max: ContentId::new(max.as_deref().unwrap_or("\u{7f}")),
                }),
            };

            let options = RewriteContentsOptions {
                content_ids: ids.iter().map(|s| ContentId::new(s.clone())).collect(),
                content_id_range,
                pack_prefix: if pack_prefix.is_empty() {
                    None
                } else {
                    Some(pack_prefix.clone())
                },
                short_packs: *short_packs,
                format_version: *format_version,
                parallel: *parallelism,
                dry_run: *dry_run,
            };

            let stats = rewrite_contents(&rep, &options, &safety, cancel)?;

            if *dry_run {
                println!(
                    "{} contents ({} bytes) would be rewritten.",
                    stats.contents_selected, stats.bytes_selected,
                );
                if stats.contents_selected > 0 {
                    println!("Re-run without --dry-run to rewrite.");
                }
            } else {
                println!(
                    "Rewrote {} contents ({} bytes).",
                    stats.contents_rewritten, stats.bytes_selected,
                );
            }
            Ok(())
        }
    }
}
