//! End-to-end tests through the host-facing surface

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;
    use std::path::Path;

    use crate::adapter::*;
    use crate::codec;
    use crate::config::SaveOptions;
    use crate::error::Error;
    use crate::jobs::{CancelToken, ServiceFilter};
    use crate::lamedb::LamedbVersion;
    use crate::models::*;
    use pretty_assertions::assert_eq;

    const LAMEDB: &str = "eDVB services /4/
transponders
00c00000:0071:0002
\ts 11758000:27500000:0:2:192:2:0:1:2:0:2
/
00c00000:0085:0001
\ts 11302000:22000000:1:4:192:2:0:0:1:0:2
/
end
services
0001:00c00000:0071:0002:1:0
Demo
p:Pkg,f:32
0002:00c00000:0085:0001:2:0
Radio One
p:Radio,c:000064,C:0b00
end
Have a lot of bugs!
";

    const SATS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!--
    hand written list
-->
<satellites>
    <sat name="4.8E Astra 4A" flags="1" position="48">
        <transponder frequency="11727000" symbol_rate="27500000" polarization="0" fec_inner="3" system="0" modulation="1"/>
    </sat>
</satellites>
"#;

    const ROOT_TV: &str = "#NAME User - bouquets (TV)
#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.favourites.tv\" ORDER BY bouquet
#SERVICE 1:519:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.hidden.tv\" ORDER BY bouquet
";

    const ROOT_RADIO: &str = "#NAME User - bouquets (Radio)\n";

    const FAVOURITES: &str = "#NAME Favourites
#SERVICE 1:64:1:0:0:0:0:0:0:0::News
#DESCRIPTION News
#SERVICE 1:0:1:1:71:2:C00000:0:0:0:
#SERVICE 1:0:2:2:85:1:C00000:0:0:0::Local Name
#DESCRIPTION Local Name
#SERVICE 1:832:D:2:0:0:0:0:0:0:
#SERVICE 4097:0:1:0:0:0:0:0:0:0:http%3a//host/s.m3u8:Channel X
#DESCRIPTION Channel X
#SERVICE 1:134:1:0:0:0:0:0:0:0:FROM BOUQUET \"alternatives.de01.tv\" ORDER BY bouquet
";

    const ALTERNATIVES: &str = "#NAME Demo Alt
#SERVICE 1:0:1:1:71:2:C00000:0:0:0:
#SERVICE 1:0:2:2:85:1:C00000:0:0:0:
";

    const HIDDEN: &str = "#NAME Hidden
#SERVICE 1:0:1:1:71:2:C00000:0:0:0:
";

    const BLACKLIST: &str = "1:0:2:2:85:1:C00000:0:0:0:
1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.favourites.tv\" ORDER BY bouquet
";

    const RELAY: &str = "1:0:1:1:71:2:C00000:0:0:0:\n\n";

    const DEMO: &str = "1:71:2:C00000";
    const RADIO: &str = "2:85:1:C00000";

    const FILES: [(&str, &str); 9] = [
        ("lamedb", LAMEDB),
        ("satellites.xml", SATS),
        ("bouquets.tv", ROOT_TV),
        ("bouquets.radio", ROOT_RADIO),
        ("userbouquet.favourites.tv", FAVOURITES),
        ("userbouquet.hidden.tv", HIDDEN),
        ("alternatives.de01.tv", ALTERNATIVES),
        ("blacklist", BLACKLIST),
        ("whitelist_streamrelay", RELAY),
    ];

    fn write_files(dir: &Path, files: &[(&str, &str)]) {
        for (name, text) in files {
            fs::write(dir.join(name), text).unwrap();
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &FILES);
        dir
    }

    fn no_backup() -> SaveOptions {
        SaveOptions {
            backup_before_save: false,
            ..SaveOptions::default()
        }
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_minimal_enigma_load() {
        let lamedb = "eDVB services /4/
transponders
00c00000:0071:0002
\ts 11758000:27500000:0:2:192:2:0:1:2:0:2
/
end
services
0001:00c00000:0071:0002:1:0
Demo
p:Pkg,f:40
end
Have a lot of bugs!
";
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("lamedb", lamedb)]);
        let (mut model, diags) = open(dir.path(), LamedbVersion::V4).unwrap();
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(model.kind, SettingsKind::Enigma2);

        let listed: Vec<&Service> = services(&model).collect();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].fav_id, DEMO);
        assert_eq!(listed[0].service_type.label(), "TV");
        assert!(listed[0].flags().is_new());
        assert!(model.is_locked(DEMO));

        let out = tempfile::tempdir().unwrap();
        save(out.path(), &mut model, &no_backup()).unwrap();
        assert_eq!(fs::read_to_string(out.path().join("lamedb")).unwrap(), lamedb);
    }

    #[test]
    fn test_load_save_is_byte_identical() {
        let dir = fixture();
        let (mut model, diags) = open(dir.path(), LamedbVersion::V4).unwrap();
        assert!(!diags.has_blocking(), "{:?}", diags);
        assert!(!model.is_dirty());

        let out = tempfile::tempdir().unwrap();
        let report = save(out.path(), &mut model, &no_backup()).unwrap();
        let mut written = report.written.clone();
        written.sort();
        assert_eq!(written, file_names(dir.path()));
        for (name, text) in &FILES {
            let emitted = fs::read_to_string(out.path().join(name)).unwrap();
            assert_eq!(&emitted, text, "{}", name);
        }
        assert!(diff_summary(dir.path(), &model, &no_backup()).unwrap().is_empty());
    }

    #[test]
    fn test_hash_survives_load_save_load() {
        let dir = fixture();
        let (mut model, _) = open(dir.path(), LamedbVersion::V4).unwrap();
        let before = model.data_hash();

        let out = tempfile::tempdir().unwrap();
        save(out.path(), &mut model, &no_backup()).unwrap();
        let (reloaded, _) = open(out.path(), LamedbVersion::V4).unwrap();
        assert_eq!(reloaded.data_hash(), before);
        assert!(!reloaded.is_dirty());
    }

    #[test]
    fn test_delete_alt_group_keeps_first_member_and_drops_file() {
        let dir = fixture();
        let (mut model, _) = open(dir.path(), LamedbVersion::V4).unwrap();
        model.delete_alt_group("de01").unwrap();
        assert!(model.is_dirty());

        let changes = diff_summary(dir.path(), &model, &no_backup()).unwrap();
        assert!(changes.contains(&("alternatives.de01.tv".to_string(), FileChange::Removed)));
        assert!(changes.contains(&("userbouquet.favourites.tv".to_string(), FileChange::Modified)));

        let report = save(dir.path(), &mut model, &no_backup()).unwrap();
        assert_eq!(report.removed, vec!["alternatives.de01.tv".to_string()]);
        assert!(!dir.path().join("alternatives.de01.tv").exists());
        let favourites = fs::read_to_string(dir.path().join("userbouquet.favourites.tv")).unwrap();
        assert!(favourites.ends_with("#DESCRIPTION Channel X\n#SERVICE 1:0:1:1:71:2:C00000:0:0:0:\n"));
        assert!(!model.is_dirty());
    }

    #[test]
    fn test_neutrino_ampersand_round_trip() {
        let services = r#"<?xml version="1.0" encoding="UTF-8"?>
<zapit api="4">
	<sat name="Hot Bird 13.0E" position="130" diseqc="0" uncommited="0">
		<TS id="0384" on="0071" frq="11034000" inv="2" sr="27500000" fec="3" pol="1" mod="0" sys="0">
			<S i="1b69" n="Rai 1" v="0200" a="0201" p="0200" pmt="0100" tx="0000" t="1" vt="0" s="0" num="0" f="0"/>
			<S i="1b6a" n="R&amp;D Radio" t="2"/>
		</TS>
		<TS id="0385" on="0071" frq="11054000" sr="27500000" pol="0"/>
	</sat>
</zapit>
"#;
        let providers = r#"<?xml version="1.0" encoding="UTF-8"?>
<zapit>
	<Bouquet name="Rai & Co" hidden="0" locked="0" epg="0">
		<S i="1b69" n="Rai 1" t="0384" on="0071" s="130" frq="11034"/>
	</Bouquet>
</zapit>
"#;
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("services.xml", services), ("bouquets.xml", providers)]);
        let (mut model, diags) = open(dir.path(), LamedbVersion::V4).unwrap();
        assert!(!diags.has_blocking(), "{:?}", diags);
        assert_eq!(model.kind, SettingsKind::Neutrino);

        let out = tempfile::tempdir().unwrap();
        save(out.path(), &mut model, &no_backup()).unwrap();
        let emitted = fs::read_to_string(out.path().join("bouquets.xml")).unwrap();
        assert_eq!(emitted, providers.replace("Rai & Co", "Rai &amp; Co"));
        assert_eq!(fs::read_to_string(out.path().join("services.xml")).unwrap(), services);

        let (mut again, _) = open(out.path(), LamedbVersion::V4).unwrap();
        let second = tempfile::tempdir().unwrap();
        save(second.path(), &mut again, &no_backup()).unwrap();
        assert_eq!(fs::read_to_string(second.path().join("bouquets.xml")).unwrap(), emitted);
    }

    #[test]
    fn test_bouquet_lock_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        write_files(
            dir.path(),
            &[
                ("lamedb", LAMEDB),
                ("bouquets.tv", "#NAME User - bouquets (TV)\n#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.kids.tv\" ORDER BY bouquet\n"),
                ("userbouquet.kids.tv", "#NAME Kids\n#SERVICE 1:0:1:1:71:2:C00000:0:0:0:\n"),
            ],
        );
        let (mut model, _) = open(dir.path(), LamedbVersion::V4).unwrap();
        let (_, kids) = bouquets(&model).next().unwrap();
        let id = kids.id;
        model.set_bouquet_locked(id, true).unwrap();
        save(dir.path(), &mut model, &no_backup()).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("blacklist")).unwrap(),
            "1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.kids.tv\" ORDER BY bouquet\n"
        );
        let (reloaded, _) = open(dir.path(), LamedbVersion::V4).unwrap();
        let (_, kids) = bouquets(&reloaded).next().unwrap();
        assert!(kids.locked);
        assert_eq!(blacklist(&reloaded).count(), 0);
    }

    #[test]
    fn test_new_bouquets_get_numbered_files() {
        let mut model = crate::model::Model::new(SettingsKind::Enigma2);
        for i in 1..=100 {
            model.add_bouquet(RootKind::Tv, &format!("Bouquet {}", i)).unwrap();
        }
        let out = tempfile::tempdir().unwrap();
        save(out.path(), &mut model, &no_backup()).unwrap();

        let root = fs::read_to_string(out.path().join("bouquets.tv")).unwrap();
        let referenced: Vec<&str> = root.lines().skip(1).collect();
        assert_eq!(referenced.len(), 100);
        for (i, line) in referenced.iter().enumerate() {
            let file = format!("userbouquet.de{:02}.tv", i + 1);
            assert!(line.contains(&format!("\"{}\"", file)), "{}", line);
            assert!(out.path().join(&file).is_file());
        }
        let (_, last) = bouquets(&model).last().unwrap();
        assert_eq!(last.file.as_deref(), Some("userbouquet.de100.tv"));
    }

    #[test]
    fn test_v3_is_saved_as_v4() {
        let v3 = "eDVB services /3/
transponders
c00000:71:2
\ts 11758000:27500000:0:2:192:2:0
/
end
services
1:c00000:71:2:1:0
Demo
p:Pkg
end
Have a lot of bugs!
";
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("lamedb", v3)]);
        let (mut model, _) = open(dir.path(), LamedbVersion::V4).unwrap();
        save(dir.path(), &mut model, &no_backup()).unwrap();
        let first = fs::read_to_string(dir.path().join("lamedb")).unwrap();
        assert!(first.starts_with("eDVB services /4/\n"));

        let (mut again, _) = open(dir.path(), LamedbVersion::V4).unwrap();
        assert_eq!(again.data_hash(), model.data_hash());
        save(dir.path(), &mut again, &no_backup()).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("lamedb")).unwrap(), first);
    }

    #[test]
    fn test_open_zip_archive() {
        let dir = fixture();
        let (from_dir, _) = open(dir.path(), LamedbVersion::V4).unwrap();

        let archives = tempfile::tempdir().unwrap();
        let path = archives.path().join("backup.zip");
        let mut writer = zip::ZipWriter::new(fs::File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        for (name, text) in &FILES {
            writer.start_file(format!("enigma2/{}", name), options).unwrap();
            writer.write_all(text.as_bytes()).unwrap();
        }
        writer.finish().unwrap();

        let (from_zip, diags) = open(&path, LamedbVersion::V4).unwrap();
        assert!(!diags.has_blocking(), "{:?}", diags);
        assert_eq!(from_zip.data_hash(), from_dir.data_hash());
        assert!(matches!(
            open(&archives.path().join("missing"), LamedbVersion::V4),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_queries_and_bulk_operations() {
        let dir = fixture();
        let (mut model, _) = open(dir.path(), LamedbVersion::V4).unwrap();

        let scrambled = find(&model, |s| s.is_scrambled());
        assert_eq!(scrambled.len(), 1);
        assert_eq!(scrambled[0].fav_id, RADIO);
        assert_eq!(blacklist(&model).collect::<Vec<_>>(), vec!["1:0:2:2:85:1:C00000:0:0:0:"]);

        let cancel = CancelToken::new();
        let filter = ServiceFilter {
            locked: Some(true),
            ..ServiceFilter::default()
        };
        let locked = filter_changed(&model, &filter, 250, &cancel, &mut |_| {}).unwrap();
        assert_eq!(locked, vec![RADIO.to_string()]);

        // Demo keeps the alternatives group alive.
        let removed = delete_many(&mut model, &[RADIO], 250, &cancel, &mut |_| {}).unwrap();
        assert_eq!(removed, 1);
        assert!(model.service(RADIO).is_none());
        assert_eq!(blacklist(&model).count(), 0);
        for (_, bouquet) in bouquets(&model) {
            assert!(!bouquet.contains(RADIO));
        }
        assert!(model.service(DEMO).is_some());

        // Lock bit of the service flags counts as locked too.
        let demo = model.services.get_mut(DEMO).unwrap();
        let flags = demo.flags();
        demo.set_flags(codec::Flags(flags.0 | 8));
        assert_eq!(demo.flags_cas, "p:Pkg,f:40");
        let locked = filter_changed(&model, &filter, 250, &cancel, &mut |_| {}).unwrap();
        assert_eq!(locked, vec![DEMO.to_string()]);
    }

    #[test]
    fn test_backup_before_save() {
        let dir = fixture();
        let backups = tempfile::tempdir().unwrap();
        let (mut model, _) = open(dir.path(), LamedbVersion::V4).unwrap();
        let options = SaveOptions {
            backup_dir: Some(backups.path().to_path_buf()),
            ..SaveOptions::default()
        };
        let report = save(dir.path(), &mut model, &options).unwrap();
        let backup = report.backup.unwrap();
        assert_eq!(file_names(&backup), file_names(dir.path()));
    }
}
