//! Subcommand implementations

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use hourdb_core::codec::Codec;
use hourdb_core::directory;
use hourdb_core::fragment::{Fragment, LayoutCheck, Row};
use hourdb_core::{Month, SeriesData, Store};
use std::io::Write;
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List fragments with their hours and shard counts
    Months,
    /// Print every row, one per line
    Dump {
        /// Only this month (YYYY-MM)
        #[arg(long)]
        month: Option<Month>,
        /// Only this shard
        #[arg(long)]
        shard: Option<u32>,
    },
    /// Print one series as a JSON array
    Get {
        /// Full series name (e.g. en/Cat)
        name: String,
        #[arg(long)]
        month: Month,
    },
    /// Print a namespace total as a JSON array (null = no data that hour)
    Total {
        namespace: String,
        #[arg(long)]
        month: Month,
    },
    /// Per-shard row counts and file size of a fragment
    Stats {
        #[arg(long)]
        month: Month,
    },
    /// Delete series whose total is below a threshold
    Prune {
        #[arg(long)]
        month: Month,
        #[arg(long)]
        threshold: f64,
    },
    /// Rebuild a fragment file, reclaiming free pages
    Vacuum {
        #[arg(long)]
        month: Month,
    },
}

impl Command {
    /// Whether the store must be opened writeable
    pub fn needs_write(&self) -> bool {
        matches!(self, Command::Prune { .. } | Command::Vacuum { .. })
    }
}

pub fn run(store: &Store, command: Command, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Months => months(store, out),
        Command::Dump { month, shard } => dump(store, month, shard, out),
        Command::Get { name, month } => {
            let data = match store.get(&name, month)? {
                Some(data) => data,
                None => bail!("{} not found in {}", name, month),
            };
            writeln!(out, "{}", serde_json::to_string(&data.to_f64_vec())?)?;
            Ok(())
        }
        Command::Total { namespace, month } => {
            let totals = store.get_namespace_total(&namespace, month)?;
            writeln!(out, "{}", serde_json::to_string(&totals)?)?;
            Ok(())
        }
        Command::Stats { month } => {
            let stats = store.fragment_stats(month)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?;
            Ok(())
        }
        Command::Prune { month, threshold } => {
            let removed = store.prune(month, threshold)?;
            writeln!(out, "pruned {} rows below {} from {}", removed, threshold, month)?;
            Ok(())
        }
        Command::Vacuum { month } => {
            let report = store.vacuum(month)?;
            writeln!(
                out,
                "vacuumed {}: {} pages of {} bytes, {} free",
                month, report.page_count, report.page_size, report.freelist_count
            )?;
            Ok(())
        }
    }
}

fn months(store: &Store, out: &mut dyn Write) -> Result<()> {
    for month in store.months()? {
        match store.layout(month)? {
            Some(layout) => writeln!(
                out,
                "{}  {:>4}h  {} shards",
                month, layout.hours_in_month, layout.shard_count
            )?,
            None => writeln!(out, "{}  (unreadable)", month)?,
        }
    }
    writeln!(
        out,
        "total {}h",
        directory::dataset_hours(store.directory())?
    )?;
    Ok(())
}

fn dump(store: &Store, month: Option<Month>, shard: Option<u32>, out: &mut dyn Write) -> Result<()> {
    let months = match month {
        Some(month) => vec![month],
        None => store.months()?,
    };
    let options = store.config().fragment_options();
    let codec = Codec::new(store.config().codec_config());

    for month in months {
        let path = directory::resolve(store.directory(), month);
        let fragment = Arc::new(
            Fragment::open_read_only(&path, LayoutCheck::default(), &options)
                .with_context(|| format!("opening {}", path.display()))?,
        );
        let layout = fragment.layout();
        writeln!(out, "fragment {} ({} hours)", month, layout.hours_in_month)?;

        let shards = match shard {
            Some(shard) => shard..shard + 1,
            None => 0..layout.shard_count,
        };
        for shard in shards {
            writeln!(out, "shard {}", shard)?;
            for row in fragment.iterate(shard)? {
                let row = row?;
                writeln!(out, "  {}", format_row(&codec, &row, layout.hours_in_month as usize))?;
            }
        }
    }
    Ok(())
}

/// `name <z|u><dtype> <total> {sparse}`; undecodable rows show the error
fn format_row(codec: &Codec, row: &Row, hours: usize) -> String {
    let marker = if row.compressed { 'z' } else { 'u' };
    let body = match codec.decode(&row.name, &row.dtype, row.compressed, &row.data, hours) {
        Ok(data) => format_sparse(&data),
        Err(e) => format!("<{}>", e),
    };
    format!("{} {}{} {} {}", row.name, marker, row.dtype, row.total, body)
}

/// `{<zeros>z <nans>n (i, v), ...}` listing only non-zero, non-NaN hours
fn format_sparse(data: &SeriesData) -> String {
    let mut zeros = 0;
    let mut nans = 0;
    let mut entries = Vec::new();

    for (hour, value) in data.iter_f64().enumerate() {
        if value == 0.0 {
            zeros += 1;
        } else if value.is_nan() {
            nans += 1;
        } else {
            entries.push(format!("({}, {})", hour, value));
        }
    }

    if entries.is_empty() {
        format!("{{{}z {}n}}", zeros, nans)
    } else {
        format!("{{{}z {}n {}}}", zeros, nans, entries.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hourdb_core::StoreConfig;
    use tempfile::TempDir;

    fn dec_2007() -> Month {
        Month::new(2007, 12).unwrap()
    }

    fn populated() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), StoreConfig::writer(2)).unwrap();
        let mut cat = vec![0.0f32; 744];
        cat[100] = 5.0;
        store.put("en/Cat", dec_2007(), &SeriesData::F32(cat)).unwrap();
        let mut dog = vec![0.0f32; 744];
        dog[3] = 1.5;
        store.put("en/Dog", dec_2007(), &SeriesData::F32(dog)).unwrap();
        let mut totals = vec![f64::NAN; 744];
        totals[3] = 1.5;
        totals[100] = 5.0;
        store.put_namespace_total("en", dec_2007(), &totals).unwrap();
        (temp_dir, store)
    }

    fn output(store: &Store, command: Command) -> String {
        let mut out = Vec::new();
        run(store, command, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_format_sparse() {
        let data = SeriesData::F64(vec![0.0, 2.5, f64::NAN, 0.0, -1.0]);
        assert_eq!(format_sparse(&data), "{2z 1n (1, 2.5), (4, -1)}");
        assert_eq!(format_sparse(&SeriesData::U8(vec![0; 3])), "{3z 0n}");
    }

    #[test]
    fn test_months_listing() {
        let (_dir, store) = populated();
        let text = output(&store, Command::Months);
        assert_eq!(text, "2007-12   744h  2 shards\ntotal 744h\n");
    }

    #[test]
    fn test_dump_rows() {
        let (_dir, store) = populated();
        let text = output(
            &store,
            Command::Dump {
                month: Some(dec_2007()),
                shard: None,
            },
        );
        assert!(text.starts_with("fragment 2007-12 (744 hours)\nshard 0\n"));
        assert!(text.contains("  en/Cat uf 5 {743z 0n (100, 5)}\n"));
        assert!(text.contains("  en/Dog zf 1.5 {743z 0n (3, 1.5)}\n"));
        assert!(text.contains("  en ud 6.5 {0z 742n (3, 1.5), (100, 5)}\n"));
    }

    #[test]
    fn test_get_and_total_json() {
        let (_dir, store) = populated();
        let text = output(
            &store,
            Command::Get {
                name: "en/Cat".into(),
                month: dec_2007(),
            },
        );
        let values: Vec<f64> = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(values.len(), 744);
        assert_eq!(values[100], 5.0);

        let text = output(
            &store,
            Command::Total {
                namespace: "en".into(),
                month: dec_2007(),
            },
        );
        let totals: Vec<Option<f64>> = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(totals[3], Some(1.5));
        assert_eq!(totals[0], None);

        let mut out = Vec::new();
        let missing = Command::Get {
            name: "en/Emu".into(),
            month: dec_2007(),
        };
        assert!(run(&store, missing, &mut out).is_err());
    }

    #[test]
    fn test_prune_command() {
        let (_dir, store) = populated();
        let command = Command::Prune {
            month: dec_2007(),
            threshold: 2.0,
        };
        assert!(command.needs_write());
        let text = output(&store, command);
        assert_eq!(text, "pruned 1 rows below 2 from 2007-12\n");
        assert!(!store.exists("en/Dog", dec_2007()).unwrap());
    }
}
