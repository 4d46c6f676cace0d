// test of the auto-detection pipeline over the shipped plugin set
use fluxkit::{detect,fmt,open_image_bytes,Error};
use fluxkit::model::TrackEncoding;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// minimal single density ATR: 720 sectors of 128 bytes
fn atr_bytes() -> Vec<u8> {
    let payload = 720 * 128;
    let paragraphs = payload / 16;
    let mut dat = vec![0u8;16 + payload];
    dat[0..2].copy_from_slice(&0x0296u16.to_le_bytes());
    dat[2..4].copy_from_slice(&(paragraphs as u16).to_le_bytes());
    dat[4..6].copy_from_slice(&128u16.to_le_bytes());
    dat
}

/// single sided MSA, 9 sectors per track, tracks 0..=1, all 0xFE
fn msa_bytes() -> Vec<u8> {
    let mut dat = vec![0x0e,0x0f, 0x00,0x09, 0x00,0x00, 0x00,0x00, 0x00,0x01];
    for _trk in 0..2 {
        dat.extend_from_slice(&[0x00,0x04]); // record length
        dat.extend_from_slice(&[0xe5,0xfe,0x12,0x00]); // 0x1200 = 9*512
    }
    dat
}

/// minimal HFE v1: header block, lookup table, one empty track chunk
fn hfe_bytes() -> Vec<u8> {
    let mut dat = vec![0u8;512*3];
    dat[0..8].copy_from_slice(b"HXCPICFE");
    dat[9] = 80;
    dat[10] = 2;
    dat[12..14].copy_from_slice(&250u16.to_le_bytes());
    dat[14..16].copy_from_slice(&300u16.to_le_bytes());
    dat[18..20].copy_from_slice(&1u16.to_le_bytes());
    dat[512..514].copy_from_slice(&2u16.to_le_bytes());
    dat[514..516].copy_from_slice(&512u16.to_le_bytes());
    dat
}

#[test]
fn atr_wins_by_signature() {
    init_log();
    let reg = fmt::builtin_registry();
    let img = open_image_bytes(&reg,&atr_bytes(),None,false).expect("detection failed");
    assert_eq!(img.format_tag,"atr");
    assert_eq!(img.geometry.cylinders,40);
    let plugin = reg.find_by_name("atr").unwrap();
    let trk = plugin.read_track(&img,0,0).expect("read failed");
    assert_eq!(trk.sectors.len(),18);
    assert_eq!(trk.encoding,TrackEncoding::Fm);
}

#[test]
fn msa_wins_by_header() {
    init_log();
    let reg = fmt::builtin_registry();
    let dat = msa_bytes();
    let img = open_image_bytes(&reg,&dat,None,false).expect("detection failed");
    assert_eq!(img.format_tag,"msa");
    let plugin = reg.find_by_name("msa").unwrap();
    let trk = plugin.read_track(&img,1,0).expect("read failed");
    assert_eq!(trk.sectors.len(),9);
    assert_eq!(trk.sectors[0].data,vec![0xfe;512]);
}

#[test]
fn hfe_wins_and_reads_flux() {
    init_log();
    let reg = fmt::builtin_registry();
    let img = open_image_bytes(&reg,&hfe_bytes(),Some("hfe"),true).expect("detection failed");
    assert_eq!(img.format_tag,"hfe");
    assert_eq!(img.geometry.cylinders,80);
    let plugin = reg.find_by_name("hfe").unwrap();
    let trk = plugin.read_track(&img,0,0).expect("read failed");
    assert_eq!(trk.encoding,TrackEncoding::RawFlux);
    assert!(trk.flux.is_some());
}

#[test]
fn shared_length_is_ambiguous() {
    init_log();
    // 720K is a PC, Atari ST, and Amiga length alike
    let reg = fmt::builtin_registry();
    let dat = vec![0u8;737280];
    assert!(matches!(open_image_bytes(&reg,&dat,None,false),Err(Error::Ambiguous)));
    match detect::run(&reg,&dat[0..4096],dat.len() as u64,None,Some(&dat)) {
        detect::Verdict::Ambiguous(list) => {
            let names: Vec<&str> = list.iter().map(|c| c.plugin.name()).collect();
            assert!(names.contains(&"pc img"));
            assert!(names.contains(&"atari st"));
            assert!(names.contains(&"amiga adf"));
        },
        _ => panic!("expected an ambiguous verdict")
    }
}

#[test]
fn extension_promotes_the_right_dump() {
    init_log();
    // still no automatic open, but the hint must rank its platform first
    let reg = fmt::builtin_registry();
    let dat = vec![0u8;737280];
    match detect::run(&reg,&dat[0..4096],dat.len() as u64,Some("adf"),Some(&dat)) {
        detect::Verdict::Ambiguous(list) => assert_eq!(list[0].plugin.name(),"amiga adf"),
        _ => panic!("expected an ambiguous verdict")
    }
}

#[test]
fn d64_needs_the_extension_hint() {
    init_log();
    let reg = fmt::builtin_registry();
    let dat = vec![0u8;174848];
    let img = open_image_bytes(&reg,&dat,Some("d64"),false).expect("detection failed");
    assert_eq!(img.format_tag,"d64");
    assert_eq!(img.geometry.cylinders,35);
    assert!(matches!(open_image_bytes(&reg,&dat,None,false),Err(Error::Ambiguous)));
}

#[test]
fn garbage_is_unrecognized() {
    init_log();
    let reg = fmt::builtin_registry();
    let dat = vec![0x55u8;1234];
    assert!(matches!(open_image_bytes(&reg,&dat,None,false),Err(Error::FormatInvalid(_))));
}

#[test]
fn concurrent_reads_of_distinct_tracks() {
    init_log();
    fn shareable<T: Send + Sync>() {}
    shareable::<fluxkit::registry::Registry>();
    shareable::<fluxkit::model::DiskImage>();
    let reg = fmt::builtin_registry();
    let img = open_image_bytes(&reg,&atr_bytes(),None,false).expect("open failed");
    let plugin = reg.find_by_name("atr").unwrap();
    std::thread::scope(|s| {
        let a = s.spawn(|| plugin.read_track(&img,1,0).expect("read failed"));
        let b = s.spawn(|| plugin.read_track(&img,2,0).expect("read failed"));
        let ta = a.join().unwrap();
        let tb = b.join().unwrap();
        assert_eq!(ta.cylinder,1);
        assert_eq!(tb.cylinder,2);
        assert_eq!(ta.sectors.len(),18);
        assert_eq!(tb.sectors.len(),18);
    });
}

#[test]
fn registry_answers_extension_queries() {
    init_log();
    let reg = fmt::builtin_registry();
    assert_eq!(reg.find_by_extension("ATR").len(),1);
    // dsk is claimed by the PC dump plugin
    assert_eq!(reg.find_by_extension("dsk")[0].name(),"pc img");
    assert!(reg.find_by_extension("woz").is_empty());
}
