#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use raidline::{
    ArrayGeometry, CacheStats, DriverConfig, RaidBus, SimRaidBus, TaglineDriver, TcpRaidBus,
    TaglineId,
};
use serde::Serialize;

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "raidline", about = "raidline — mirrored tagline storage driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GeometryArgs {
    /// Number of disks in the array.
    #[arg(long, default_value_t = 9)]
    disks: u8,
    /// Blocks per disk.
    #[arg(long, default_value_t = 4096)]
    blocks_per_disk: u32,
    /// Block size in bytes.
    #[arg(long, default_value_t = 1024)]
    block_size: usize,
    /// Cache capacity in entries.
    #[arg(long, default_value_t = 8192)]
    cache_capacity: usize,
    /// Number of taglines to create.
    #[arg(long, default_value_t = 4)]
    maxlines: u32,
}

#[derive(Subcommand)]
enum Command {
    /// Run a deterministic read/write workload and report cache counters.
    Exercise {
        #[command(flatten)]
        geometry: GeometryArgs,
        /// Logical blocks to write per tagline.
        #[arg(long, default_value_t = 64)]
        blocks: u32,
        /// Address of a remote RAID array; the in-process simulator is
        /// used when omitted.
        #[arg(long)]
        bus: Option<String>,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Write a data set, fail one disk, recover it, and verify every block.
    Failover {
        #[command(flatten)]
        geometry: GeometryArgs,
        /// Logical blocks to write per tagline.
        #[arg(long, default_value_t = 64)]
        blocks: u32,
        /// Disk to fail before recovery.
        #[arg(long, default_value_t = 1)]
        fail_disk: u8,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WorkloadReport {
    taglines: u32,
    blocks_per_tagline: u32,
    blocks_verified: u64,
    cache: CacheStats,
}

#[derive(Debug, Serialize)]
struct FailoverReport {
    failed_disk: u8,
    blocks_verified: u64,
    cache: CacheStats,
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Exercise {
            geometry,
            blocks,
            bus,
            json,
        } => exercise(&geometry, blocks, bus.as_deref(), json),
        Command::Failover {
            geometry,
            blocks,
            fail_disk,
            json,
        } => failover(&geometry, blocks, fail_disk, json),
    }
}

fn build_geometry(args: &GeometryArgs) -> Result<ArrayGeometry> {
    if args.block_size < 8 {
        bail!("block size must be at least 8 bytes to hold the workload stamp");
    }
    ArrayGeometry::new(args.disks, args.blocks_per_disk, args.block_size)
        .context("invalid array geometry")
}

fn driver_config(args: &GeometryArgs) -> DriverConfig {
    DriverConfig {
        cache_capacity: args.cache_capacity,
        ..DriverConfig::default()
    }
}

fn exercise(args: &GeometryArgs, blocks: u32, bus: Option<&str>, json: bool) -> Result<()> {
    let geometry = build_geometry(args)?;
    let config = driver_config(args);

    let report = match bus {
        Some(addr) => {
            let bus = TcpRaidBus::connect(addr)
                .with_context(|| format!("failed to connect to RAID array at {addr}"))?;
            let driver = TaglineDriver::init(bus, geometry, args.maxlines, config)
                .context("driver init")?;
            run_workload(driver, geometry, args.maxlines, blocks)?
        }
        None => {
            let bus = SimRaidBus::new(geometry);
            let driver = TaglineDriver::init(bus, geometry, args.maxlines, config)
                .context("driver init")?;
            run_workload(driver, geometry, args.maxlines, blocks)?
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize report")?
        );
    } else {
        println!("raidline workload");
        println!(
            "  verified {} blocks across {} taglines",
            report.blocks_verified, report.taglines
        );
        print_cache_stats(&report.cache);
    }
    Ok(())
}

fn run_workload<B: RaidBus>(
    mut driver: TaglineDriver<B>,
    geometry: ArrayGeometry,
    maxlines: u32,
    blocks: u32,
) -> Result<WorkloadReport> {
    let block_size = geometry.block_size();
    let mut verified = 0_u64;

    for line in 0..maxlines {
        let tag = TaglineId(line as u16);
        for block in 0..blocks {
            let payload = workload_payload(block_size, line, block, 0);
            driver.write(tag, block, 1, &payload).with_context(|| {
                format!("write of block {block} on tagline {line} failed")
            })?;
        }
        // Overwrite every fourth block with a second generation.
        for block in (0..blocks).step_by(4) {
            let payload = workload_payload(block_size, line, block, 1);
            driver.write(tag, block, 1, &payload).with_context(|| {
                format!("overwrite of block {block} on tagline {line} failed")
            })?;
        }
    }

    for line in 0..maxlines {
        let tag = TaglineId(line as u16);
        for block in 0..blocks {
            let generation = u8::from(block % 4 == 0);
            let expected = workload_payload(block_size, line, block, generation);
            let mut out = vec![0_u8; block_size];
            driver.read(tag, block, 1, &mut out).with_context(|| {
                format!("read of block {block} on tagline {line} failed")
            })?;
            if out != expected {
                bail!("verification mismatch at tagline {line}, block {block}");
            }
            verified += 1;
        }
    }

    let cache = driver.close().context("driver close")?;
    Ok(WorkloadReport {
        taglines: maxlines,
        blocks_per_tagline: blocks,
        blocks_verified: verified,
        cache,
    })
}

fn failover(args: &GeometryArgs, blocks: u32, fail_disk: u8, json: bool) -> Result<()> {
    let geometry = build_geometry(args)?;
    if fail_disk >= geometry.disks() {
        bail!(
            "disk {fail_disk} does not exist (array has {} disks)",
            geometry.disks()
        );
    }

    let bus = SimRaidBus::new(geometry);
    let handle = bus.clone();
    let mut driver = TaglineDriver::init(bus, geometry, args.maxlines, driver_config(args))
        .context("driver init")?;

    let block_size = geometry.block_size();
    for line in 0..args.maxlines {
        let tag = TaglineId(line as u16);
        for block in 0..blocks {
            let payload = workload_payload(block_size, line, block, 0);
            driver
                .write(tag, block, 1, &payload)
                .with_context(|| format!("seed write failed at tagline {line}, block {block}"))?;
        }
    }

    handle.fail_disk(fail_disk);
    driver.disk_signal().context("disk recovery")?;

    let mut verified = 0_u64;
    for line in 0..args.maxlines {
        let tag = TaglineId(line as u16);
        for block in 0..blocks {
            let expected = workload_payload(block_size, line, block, 0);
            let mut out = vec![0_u8; block_size];
            driver.read(tag, block, 1, &mut out).with_context(|| {
                format!("post-recovery read failed at tagline {line}, block {block}")
            })?;
            if out != expected {
                bail!("post-recovery mismatch at tagline {line}, block {block}");
            }
            verified += 1;
        }
    }

    let cache = driver.close().context("driver close")?;
    let report = FailoverReport {
        failed_disk: fail_disk,
        blocks_verified: verified,
        cache,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize report")?
        );
    } else {
        println!("raidline failover");
        println!(
            "  disk {} failed, recovered, and {} blocks verified",
            report.failed_disk, report.blocks_verified
        );
        print_cache_stats(&report.cache);
    }
    Ok(())
}

fn workload_payload(block_size: usize, line: u32, block: u32, generation: u8) -> Vec<u8> {
    let mut payload = vec![generation; block_size];
    payload[..4].copy_from_slice(&line.to_le_bytes());
    payload[4..8].copy_from_slice(&block.to_le_bytes());
    payload
}

fn print_cache_stats(stats: &CacheStats) {
    println!("  cache:");
    println!("    inserts   {:>8}", stats.inserts);
    println!("    gets      {:>8}", stats.gets);
    println!("    hits      {:>8}", stats.hits);
    println!("    misses    {:>8}", stats.misses);
    println!("    evictions {:>8}", stats.evictions);
    println!("    hit ratio {:>7.2}%", stats.hit_ratio() * 100.0);
}
