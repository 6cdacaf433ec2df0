//! Command line definitions and their handlers.

use std::{
    fs,
    path::{Path, PathBuf},
};

use actpack::{
    Atf, AtfReader, ContainerFormat, ContainerReader, EntryChecksum, FirmwareVersion,
    NvramRegionBuilder, Ota, OtaHeader, OtaPatchBuilder, OtaReader, PartitionTable, Properties,
    SequenceVariant,
    checksum::{DEFAULT_CRC_CHUNK, add_chunk_crc, strip_chunk_crc},
    nvram::read_items,
    partition::PARTITION_TABLE_SIZE,
    version::VERSION_RECORD_SIZE,
};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use crate::{
    config::{FirmwareConfig, parse_number},
    firmware::FirmwareBuilder,
    utils::{HostRunner, expand_inputs},
};

#[derive(Parser, Debug)]
#[command(name = "actpack", version, about = "Actions SoC firmware packing tool")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// ATF test images
    #[command(subcommand)]
    Atf(AtfCommand),
    /// OTA update images
    #[command(subcommand)]
    Ota(OtaCommand),
    /// NVRAM property regions
    #[command(subcommand)]
    Nvram(NvramCommand),
    /// Partition tables
    #[command(subcommand)]
    Parttbl(PartTableCommand),
    /// Chunk CRC16 trailers
    #[command(subcommand)]
    Crc(CrcCommand),
    /// Build the whole firmware from a description
    Firmware(FirmwareArgs),
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Image to read
    #[arg(short, long)]
    pub input: PathBuf,
    /// Output directory
    #[arg(short = 'x', long)]
    pub out_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Image to read
    #[arg(short, long)]
    pub input: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum AtfCommand {
    /// Pack files into an ATF image
    Build {
        #[arg(short, long)]
        output: PathBuf,
        /// Build time stamp, defaults to now (yymmddHHMM)
        #[arg(long)]
        build_time: Option<String>,
        /// Use 32-bit word sums instead of CRC32 in the directory
        #[arg(long)]
        sum32: bool,
        /// Input files, or a single directory
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Extract every file of an ATF image
    Extract(ExtractArgs),
    /// Show and verify an ATF image
    Info {
        #[command(flatten)]
        args: InfoArgs,
        /// The directory holds 32-bit word sums instead of CRC32
        #[arg(long)]
        sum32: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum OtaCommand {
    /// Pack files into an OTA image
    Build {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        version_name: String,
        #[arg(long, value_parser = parse_u32)]
        version_code: u32,
        #[arg(long, default_value = "")]
        board: String,
        /// Input files, or a single directory; must include ota.xml
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Extract every file of an OTA image
    Extract(ExtractArgs),
    /// Show and verify an OTA image
    Info(InfoArgs),
    /// Build a patch image between two OTA images
    Patch {
        #[arg(long)]
        old: PathBuf,
        #[arg(long)]
        new: PathBuf,
        #[arg(short = 'p', long)]
        output: PathBuf,
        /// Scratch directory, defaults to `ota_patch` next to the output
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Binary diff program, called as `TOOL OLD NEW PATCH`
        #[arg(long)]
        diff_tool: Option<PathBuf>,
        /// Firmware description used for the diff tool and file order
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum NvramCommand {
    /// Merge property files into an NVRAM region
    Build {
        #[arg(short, long)]
        output: PathBuf,
        /// Property files, later files win
        #[arg(required = true)]
        props: Vec<PathBuf>,
    },
    /// Print the properties stored in a region
    Dump(InfoArgs),
}

#[derive(Subcommand, Debug)]
pub enum PartTableCommand {
    /// Encode the partition table of a firmware description
    Build {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print a partition table or SYS_PARAM file
    Dump(InfoArgs),
}

#[derive(Subcommand, Debug)]
pub enum CrcCommand {
    /// Append a CRC16 to every chunk of a file, in place
    Add {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long, default_value_t = DEFAULT_CRC_CHUNK)]
        chunk: usize,
    },
    /// Check the chunk CRC16 trailers of a file
    Check {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long, default_value_t = DEFAULT_CRC_CHUNK)]
        chunk: usize,
    },
}

#[derive(Args, Debug)]
pub struct FirmwareArgs {
    /// Firmware description
    #[arg(short, long)]
    pub config: PathBuf,
    /// Board name, overrides the description
    #[arg(long)]
    pub board: Option<String>,
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let n = parse_number(s)?;
    u32::try_from(n).map_err(|_| format!("{s} does not fit in 32 bits"))
}

fn build_time_now() -> String {
    chrono::Local::now().format("%y%m%d%H%M").to_string()
}

fn read_image(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("can not read {}", path.display()))
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Atf(cmd) => run_atf(cmd),
        Commands::Ota(cmd) => run_ota(cmd),
        Commands::Nvram(cmd) => run_nvram(cmd),
        Commands::Parttbl(cmd) => run_part_table(cmd),
        Commands::Crc(cmd) => run_crc(cmd),
        Commands::Firmware(args) => run_firmware(args),
    }
}

fn run_atf(cmd: AtfCommand) -> anyhow::Result<()> {
    match cmd {
        AtfCommand::Build {
            output,
            build_time,
            sum32,
            inputs,
        } => {
            let stamp = build_time.unwrap_or_else(build_time_now);
            let mut builder = Atf::new()
                .with_build_time(&stamp)?
                .with_entry_checksum(entry_checksum(sum32))
                .builder();
            for file in expand_inputs(&inputs)? {
                builder.add_file(&file)?;
            }
            let size = builder.write_to(&output)?;
            info!("ATF: wrote {} ({size} bytes)", output.display());
        }
        AtfCommand::Extract(args) => {
            let image = read_image(&args.input)?;
            let reader = AtfReader::parse(&image)?;
            for path in reader.extract_to(&args.out_dir)? {
                println!("{}", path.display());
            }
        }
        AtfCommand::Info { args, sum32 } => {
            let image = read_image(&args.input)?;
            let format = Atf::new().with_entry_checksum(entry_checksum(sum32));
            let reader = AtfReader::parse_with(format, &image)?;
            println!("build time: {}", Atf::build_time(&image).unwrap_or_default());
            print_entries(&reader);
            reader.verify()?;
            println!("{}", "checksums OK".green());
        }
    }
    Ok(())
}

fn entry_checksum(sum32: bool) -> EntryChecksum {
    if sum32 {
        EntryChecksum::Sum32
    } else {
        EntryChecksum::Crc32
    }
}

fn print_entries<F: ContainerFormat>(reader: &ContainerReader<'_, F>) {
    println!("{:<12} {:>10} {:>10} {:>10}", "name", "offset", "length", "checksum");
    for e in reader.entries() {
        println!(
            "{:<12} {:>#10x} {:>10} {:>#010x}",
            e.name, e.offset, e.length, e.checksum
        );
    }
}

fn print_version(label: &str, version: Option<&FirmwareVersion>) {
    match version {
        Some(v) => println!(
            "{label}: {} code {:#x} board {}",
            v.version_name, v.version_code, v.board_name
        ),
        None => println!("{label}: none"),
    }
}

fn run_ota(cmd: OtaCommand) -> anyhow::Result<()> {
    match cmd {
        OtaCommand::Build {
            output,
            version_name,
            version_code,
            board,
            inputs,
        } => {
            let version = FirmwareVersion::new(version_name, board, version_code);
            let mut builder = Ota::new(version).builder();
            for file in expand_inputs(&inputs)? {
                builder.add_file(&file)?;
            }
            let size = builder.write_to(&output)?;
            info!("OTA: wrote {} ({size} bytes)", output.display());
        }
        OtaCommand::Extract(args) => {
            let image = read_image(&args.input)?;
            let reader = OtaReader::parse(&image)?;
            for path in reader.extract_to(&args.out_dir)? {
                println!("{}", path.display());
            }
        }
        OtaCommand::Info(args) => {
            let image = read_image(&args.input)?;
            let header = OtaHeader::parse(&image)?;
            let reader = OtaReader::parse(&image)?;
            println!(
                "{} image, {} files, {} bytes",
                if header.is_patch() { "patch" } else { "full" },
                header.file_count,
                header.data_size
            );
            print_version("new version", header.new_version.as_ref());
            print_version("old version", header.old_version.as_ref());
            print_entries(&reader);
            reader.verify()?;
            println!("{}", "checksums OK".green());
        }
        OtaCommand::Patch {
            old,
            new,
            output,
            work_dir,
            diff_tool,
            config,
        } => {
            let config = config.as_deref().map(FirmwareConfig::load).transpose()?;
            let diff_tool = diff_tool
                .or_else(|| config.as_ref().and_then(|c| c.tools.diff.clone()))
                .context("no diff tool given, use --diff-tool or [tools] diff")?;
            let out_dir = output
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            let work_dir = work_dir.unwrap_or_else(|| out_dir.join("ota_patch"));

            let runner = HostRunner::new(&out_dir);
            let mut builder = OtaPatchBuilder::new(&runner, diff_tool, work_dir);
            if let Some(config) = &config {
                builder = builder.with_sequencer(config.sequencer(SequenceVariant::Patch));
            }
            let size = builder.write_to(&old, &new, &output)?;
            info!("OTA: wrote patch {} ({size} bytes)", output.display());
        }
    }
    Ok(())
}

fn run_nvram(cmd: NvramCommand) -> anyhow::Result<()> {
    match cmd {
        NvramCommand::Build { output, props } => {
            let props = Properties::from_files(&props)?;
            let merged = output.with_file_name("nvram.prop");
            props.write_to(&merged)?;
            info!("NVRAM: {} properties merged into {}", props.len(), merged.display());

            let size = NvramRegionBuilder::new(props).write_to(&output)?;
            info!("NVRAM: wrote {} ({size} bytes)", output.display());
        }
        NvramCommand::Dump(args) => {
            let region = read_image(&args.input)?;
            for (key, value) in read_items(&region)? {
                println!("{key}={value}");
            }
        }
    }
    Ok(())
}

fn run_part_table(cmd: PartTableCommand) -> anyhow::Result<()> {
    match cmd {
        PartTableCommand::Build { config, output } => {
            let table = FirmwareConfig::load(&config)?.partition_table()?.encode()?;
            fs::write(&output, table)
                .with_context(|| format!("can not write {}", output.display()))?;
            info!("PARTTBL: wrote {}", output.display());
        }
        PartTableCommand::Dump(args) => {
            let data = read_image(&args.input)?;
            let table = PartitionTable::parse(&data)?;
            println!(
                "{:<8} {:<9} {:>3} {:>6} {:>6} {:>10} {:>10} {:>10} {:>5}",
                "name", "type", "id", "mirror", "store", "address", "size", "file_addr", "flags"
            );
            for e in table.entries() {
                println!(
                    "{:<8} {:<9} {:>3} {:>6} {:>6} {:>#10x} {:>#10x} {:>#10x} {:>#5x}",
                    e.name,
                    e.part_type.as_str(),
                    e.file_id,
                    e.mirror_id,
                    e.storage_id,
                    e.address,
                    e.size,
                    e.file_address,
                    e.flags.bits()
                );
            }
            if data.len() >= PARTITION_TABLE_SIZE + VERSION_RECORD_SIZE {
                let (version, sys_code) =
                    FirmwareVersion::from_record(&data[PARTITION_TABLE_SIZE..])?;
                print_version("version", Some(&version));
                println!("sys version code: {sys_code:#x}");
            }
        }
    }
    Ok(())
}

fn run_crc(cmd: CrcCommand) -> anyhow::Result<()> {
    match cmd {
        CrcCommand::Add { input, chunk } => {
            if chunk == 0 {
                bail!("chunk size must not be zero");
            }
            let data = read_image(&input)?;
            let out = add_chunk_crc(&data, chunk);
            fs::write(&input, &out)?;
            info!("CRC: {} grew from {} to {} bytes", input.display(), data.len(), out.len());
        }
        CrcCommand::Check { input, chunk } => {
            if chunk == 0 {
                bail!("chunk size must not be zero");
            }
            let data = read_image(&input)?;
            strip_chunk_crc(&data, chunk)
                .with_context(|| format!("{} has bad chunk CRCs", input.display()))?;
            println!("{}", "checksums OK".green());
        }
    }
    Ok(())
}

fn run_firmware(args: FirmwareArgs) -> anyhow::Result<()> {
    let config = FirmwareConfig::load(&args.config)?;
    let fw_dir = args
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let runner = HostRunner::new(&fw_dir);
    let outputs = FirmwareBuilder::new(config, &fw_dir, &runner)
        .with_board(args.board)
        .build()?;

    info!("FW: raw image {}", outputs.raw.display());
    info!("FW: OTA image {}", outputs.ota.display());
    info!("FW: OTA image without CRC/encryption {}", outputs.ota_orig.display());
    println!("{}", "Build firmware successfully!".green().bold());
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ota_build() {
        let cli = Cli::try_parse_from([
            "actpack",
            "ota",
            "build",
            "-o",
            "ota.bin",
            "--version-name",
            "1.0.1",
            "--version-code",
            "0x101",
            "ota/",
        ])
        .unwrap();
        match cli.command {
            Commands::Ota(OtaCommand::Build {
                version_code,
                board,
                inputs,
                ..
            }) => {
                assert_eq!(version_code, 0x101);
                assert_eq!(board, "");
                assert_eq!(inputs, [PathBuf::from("ota/")]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_version_code() {
        assert!(Cli::try_parse_from([
            "actpack",
            "ota",
            "build",
            "-o",
            "x",
            "--version-name",
            "1",
            "--version-code",
            "0x100000000",
            "a",
        ])
        .is_err());
    }

    #[test]
    fn test_atf_build_extract_commands() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("att");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("a.bin"), vec![1; 10]).unwrap();
        fs::write(src.join("boot.bin"), vec![2; 600]).unwrap();

        let image = dir.path().join("test.atf");
        run_atf(AtfCommand::Build {
            output: image.clone(),
            build_time: Some("2410161230".into()),
            sum32: false,
            inputs: vec![src.clone()],
        })
        .unwrap();
        assert_eq!(fs::metadata(&image).unwrap().len(), 2048);

        let out = dir.path().join("out");
        run_atf(AtfCommand::Extract(ExtractArgs {
            input: image.clone(),
            out_dir: out.clone(),
        }))
        .unwrap();
        assert_eq!(fs::read(out.join("boot.bin")).unwrap(), vec![2; 600]);
        run_atf(AtfCommand::Info {
            args: InfoArgs {
                input: image.clone(),
            },
            sum32: false,
        })
        .unwrap();
        assert!(
            run_atf(AtfCommand::Info {
                args: InfoArgs { input: image },
                sum32: true,
            })
            .is_err()
        );
    }

    #[test]
    fn test_atf_sum32_info() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("t.bin");
        fs::write(&file, [1, 0, 0, 0, 2, 0]).unwrap();
        let image = dir.path().join("sum.atf");
        run_atf(AtfCommand::Build {
            output: image.clone(),
            build_time: Some("2410161230".into()),
            sum32: true,
            inputs: vec![file],
        })
        .unwrap();
        run_atf(AtfCommand::Info {
            args: InfoArgs { input: image },
            sum32: true,
        })
        .unwrap();
    }

    #[test]
    fn test_nvram_build_writes_merged_props() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("defcfg.prop");
        let b = dir.path().join("board.prop");
        fs::write(&a, "BT_NAME=speaker\nVOLUME=8\n").unwrap();
        fs::write(&b, "VOLUME=12\n").unwrap();

        let output = dir.path().join("nvram.bin");
        run_nvram(NvramCommand::Build {
            output: output.clone(),
            props: vec![a, b],
        })
        .unwrap();

        let merged = fs::read_to_string(dir.path().join("nvram.prop")).unwrap();
        assert_eq!(merged, "BT_NAME=speaker\nVOLUME=12\n");
        let items = read_items(&fs::read(&output).unwrap()).unwrap();
        assert_eq!(items[1], ("VOLUME".to_string(), "12".to_string()));
    }

    #[test]
    fn test_crc_add_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.bin");
        fs::write(&file, vec![7; 40]).unwrap();
        run_crc(CrcCommand::Add {
            input: file.clone(),
            chunk: 32,
        })
        .unwrap();
        assert_eq!(fs::metadata(&file).unwrap().len(), 68);
        run_crc(CrcCommand::Check {
            input: file.clone(),
            chunk: 32,
        })
        .unwrap();
        assert!(run_crc(CrcCommand::Add { input: file, chunk: 0 }).is_err());
    }
}
