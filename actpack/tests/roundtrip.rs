use std::fs;

use actpack::{
    Atf, AtfReader, EntryInput, FirmwareVersion, NvramRegionBuilder, OTA_MANIFEST, Ota,
    OtaHeader, OtaReader, OtaSequencer, PartitionEntry, PartitionFlags, PartitionTable,
    PartitionType, Properties, RawImageBuilder, SequencePartition, SequenceVariant,
    checksum::{add_chunk_crc, strip_chunk_crc},
    nvram::read_items,
    version::param_block,
};

fn sample_files() -> Vec<(String, Vec<u8>)> {
    vec![
        ("mbrec.bin".to_string(), vec![0x11; 100]),
        ("app.bin".to_string(), (0..3000u32).map(|i| (i * 7) as u8).collect()),
        ("param.bin".to_string(), vec![0x22; 512]),
        ("nvram.bin".to_string(), vec![0x33; 513]),
    ]
}

#[test]
fn atf_extract_equals_input() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir(&src).unwrap();

    let mut builder = Atf::new().with_build_time("2410161230").unwrap().builder();
    for (name, data) in sample_files() {
        let path = src.join(&name);
        fs::write(&path, &data).unwrap();
        builder.add_file(&path).unwrap();
    }
    let image_path = dir.path().join("test.atf");
    builder.write_to(&image_path).unwrap();

    let image = fs::read(&image_path).unwrap();
    let reader = AtfReader::parse(&image).unwrap();
    reader.verify().unwrap();
    assert!(reader.entries().iter().all(|e| e.offset % 512 == 0));

    let out = dir.path().join("out");
    let written = reader.extract_to(&out).unwrap();
    assert_eq!(written.len(), 4);
    for (name, data) in sample_files() {
        assert_eq!(fs::read(out.join(name)).unwrap(), data);
    }
}

#[test]
fn ota_extract_equals_input() {
    let dir = tempfile::tempdir().unwrap();
    let mut files = sample_files();
    files.push((OTA_MANIFEST.to_string(), b"<ota_firmware/>".to_vec()));

    let sequencer = OtaSequencer::new(
        vec![
            SequencePartition::new(PartitionType::Boot, Some("mbrec.bin"), true),
            SequencePartition::new(PartitionType::SysParam, Some("param.bin"), true),
            SequencePartition::new(PartitionType::System, Some("app.bin"), true),
            SequencePartition::new(PartitionType::Data, Some("nvram.bin"), true),
        ],
        SequenceVariant::Full,
    );
    let mut names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
    sequencer.sort(&mut names);
    assert_eq!(
        names,
        [OTA_MANIFEST, "app.bin", "nvram.bin", "mbrec.bin", "param.bin"]
    );

    let version = FirmwareVersion::new("1.0.0_2410161230", "ats2853", 0x100);
    let mut builder = Ota::new(version.clone()).builder();
    for name in &names {
        let data = &files.iter().find(|(n, _)| n == name).unwrap().1;
        builder.add(EntryInput::new(*name, data.clone())).unwrap();
    }
    let image = builder.build().unwrap();

    assert_eq!(OtaHeader::parse(&image).unwrap().new_version, Some(version));
    let reader = OtaReader::parse(&image).unwrap();
    reader.verify().unwrap();
    let order: Vec<_> = reader.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(order, names);

    let out = dir.path().join("ota");
    reader.extract_to(&out).unwrap();
    for (name, data) in &files {
        assert_eq!(&fs::read(out.join(name)).unwrap(), data);
    }
}

#[test]
fn rejected_name_produces_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let long = dir.path().join("thirteen.name");
    fs::write(&long, [1]).unwrap();

    let mut builder = Atf::new().builder();
    assert!(builder.add_file(&long).is_err());
    assert!(builder.is_empty());
}

#[test]
fn param_file_and_raw_image() {
    let mut table = PartitionTable::new();
    table
        .push(
            PartitionEntry::new("boot", PartitionType::Boot, 0, 0x1000)
                .with_file_id(1)
                .with_flags(PartitionFlags::CRC),
        )
        .unwrap()
        .push(
            PartitionEntry::new("param", PartitionType::SysParam, 0x1000, 0x1000).with_file_id(2),
        )
        .unwrap();
    let record = FirmwareVersion::new("1.0", "board", 1).to_record(0).unwrap();
    let param = param_block(&table.encode().unwrap(), &record);
    assert_eq!(param.len(), 512);
    assert_eq!(PartitionTable::parse(&param).unwrap(), table);
    assert_eq!(
        FirmwareVersion::from_record(&param[0x180..]).unwrap().0.version_name,
        "1.0"
    );

    let boot = add_chunk_crc(&[0x5a; 40], 32);
    assert_eq!(strip_chunk_crc(&boot, 32).unwrap()[..40], [0x5a; 40]);

    let mut raw = RawImageBuilder::new(0x4000);
    raw.place("boot", 0, &boot)
        .unwrap()
        .place("param", 0x1000, &param)
        .unwrap();
    let image = raw.build();
    assert_eq!(&image[..boot.len()], &boot[..]);
    assert_eq!(&image[0x1000..0x1200], &param[..]);
    assert!(image[0x1200..].iter().all(|&b| b == 0xff));
}

#[test]
fn nvram_region_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let defaults = dir.path().join("defcfg.prop");
    let board = dir.path().join("board.prop");
    fs::write(&defaults, "# defaults\nBT_NAME=speaker\nVOLUME=8\n").unwrap();
    fs::write(&board, "// board\nBT_NAME=ats2853\n").unwrap();

    let props = Properties::from_files(&[defaults, board]).unwrap();
    let out = dir.path().join("nvram.bin");
    let len = NvramRegionBuilder::new(props).write_to(&out).unwrap();
    assert_eq!(len, 512);

    let items = read_items(&fs::read(out).unwrap()).unwrap();
    assert_eq!(
        items,
        [
            ("BT_NAME".to_string(), "ats2853".to_string()),
            ("VOLUME".to_string(), "8".to_string())
        ]
    );
}
