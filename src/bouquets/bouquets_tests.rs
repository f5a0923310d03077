//! Tests for Enigma2 bouquet reading and writing

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;

    use crate::bouquets::{reader, writer};
    use crate::bouquets::{bouquet_file_of, file_stem, is_bouquet_file, safe_file_name};
    use crate::error::{DiagnosticKind, Diagnostics};
    use crate::lamedb::{parser, ServiceTable};
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
p:Pkg
0002:00c00000:0085:0001:2:0
Radio One
p:Radio
end
";

    const ROOT_TV: &str = "#NAME User - bouquets (TV)
#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.favourites.tv\" ORDER BY bouquet
#SERVICE 1:519:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.hidden.tv\" ORDER BY bouquet
";

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

    fn table() -> ServiceTable {
        let mut diags = Diagnostics::new();
        parser::parse("lamedb", LAMEDB, &mut diags).unwrap()
    }

    fn write_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, text) in files {
            std::fs::write(dir.path().join(name), text).unwrap();
        }
        dir
    }

    fn load(dir: &Path) -> (Vec<BouquetRoot>, ServiceTable, Diagnostics) {
        let mut services = table();
        let mut ids = IdAllocator::default();
        let mut diags = Diagnostics::new();
        let roots = reader::load(dir, &mut services, &mut ids, &mut diags);
        (roots, services, diags)
    }

    fn files_of(rendered: &writer::Rendered) -> HashMap<&str, &str> {
        rendered
            .files
            .iter()
            .map(|(name, text)| (name.as_str(), text.as_str()))
            .collect()
    }

    #[test]
    fn test_helpers() {
        assert_eq!(
            bouquet_file_of("1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.a.tv\" ORDER BY bouquet"),
            Some("userbouquet.a.tv")
        );
        assert_eq!(file_stem("alternatives.de01.tv"), "de01");
        assert_eq!(file_stem("userbouquet.my.news.radio"), "my.news");
        assert_eq!(safe_file_name("My News!"), "My_News_");
        assert!(is_bouquet_file("subbouquet.de02.radio"));
        assert!(!is_bouquet_file("bouquets.tv"));
        assert!(!is_bouquet_file("userbouquet.a.xml"));
    }

    #[test]
    fn test_round_trip() {
        let dir = write_dir(&[
            ("bouquets.tv", ROOT_TV),
            ("userbouquet.favourites.tv", FAVOURITES),
            ("userbouquet.hidden.tv", HIDDEN),
            ("alternatives.de01.tv", ALTERNATIVES),
        ]);
        let (roots, services, diags) = load(dir.path());
        assert_eq!(diags.iter().filter(|d| d.kind == DiagnosticKind::Parse).count(), 0);
        assert_eq!(roots.len(), 2);

        let tv = &roots[0];
        assert_eq!(tv.bouquets.len(), 2);
        let favourites = &tv.bouquets[0];
        assert_eq!(favourites.name, "Favourites");
        assert_eq!(favourites.entries.len(), 6);
        assert!(tv.bouquets[1].hidden);

        match &favourites.entries[2] {
            BouquetEntry::Service(s) => {
                assert_eq!(s.fav_id, "2:85:1:C00000");
                assert_eq!(s.extra_name.as_deref(), Some("Local Name"));
            }
            other => panic!("unexpected entry {:?}", other),
        }
        match &favourites.entries[5] {
            BouquetEntry::Alt(alt) => {
                assert_eq!(alt.alt_id, "de01");
                assert_eq!(alt.name, "Demo Alt");
                assert_eq!(alt.members.len(), 2);
            }
            other => panic!("unexpected entry {:?}", other),
        }

        // Streams are registered in the service table.
        let stream = "4097:0:1:0:0:0:0:0:0:0:http%3a//host/s.m3u8:Channel X";
        assert!(services.get(stream).unwrap().is_iptv());

        let rendered = writer::render(&roots, &services, false);
        let files = files_of(&rendered);
        assert_eq!(files["bouquets.tv"], ROOT_TV);
        assert_eq!(files["userbouquet.favourites.tv"], FAVOURITES);
        assert_eq!(files["userbouquet.hidden.tv"], HIDDEN);
        assert_eq!(files["alternatives.de01.tv"], ALTERNATIVES);
        assert_eq!(files["bouquets.radio"], "#NAME User - bouquets (Radio)\n");
        assert!(rendered.locked_headers.is_empty());
    }

    #[test]
    fn test_missing_file_gives_empty_bouquet() {
        let root = "#NAME TV\n#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.gone.tv\" ORDER BY bouquet\n";
        let dir = write_dir(&[("bouquets.tv", root)]);
        let (roots, _, diags) = load(dir.path());
        assert_eq!(roots[0].name, "TV");
        assert_eq!(roots[0].bouquets[0].name, "gone [empty]");
        assert!(roots[0].bouquets[0].entries.is_empty());
        assert!(diags.iter().any(|d| d.kind == DiagnosticKind::Notice));
        assert!(!diags.has_blocking());
    }

    #[test]
    fn test_duplicate_names_get_suffix() {
        let root = "#NAME TV
#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.a.tv\" ORDER BY bouquet
#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.b.tv\" ORDER BY bouquet
";
        let dir = write_dir(&[
            ("bouquets.tv", root),
            ("userbouquet.a.tv", "#NAME Sport\n"),
            ("userbouquet.b.tv", "#NAME Sport\n"),
        ]);
        let (roots, _, _) = load(dir.path());
        let names: Vec<&str> = roots[0].bouquets.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Sport", "Sport 1"]);
    }

    #[test]
    fn test_unknown_service_is_dropped() {
        let root = "#NAME TV\n#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.a.tv\" ORDER BY bouquet\n";
        let body = "#NAME A\n#SERVICE 1:0:1:9:9:9:C00000:0:0:0:\n#SERVICE 1:0:1:1:71:2:C00000:0:0:0:\n";
        let dir = write_dir(&[("bouquets.tv", root), ("userbouquet.a.tv", body)]);
        let (roots, _, diags) = load(dir.path());
        assert_eq!(roots[0].bouquets[0].entries.len(), 1);
        let diag = diags.iter().find(|d| d.kind == DiagnosticKind::Parse).unwrap();
        assert_eq!(diag.file, "userbouquet.a.tv");
        assert_eq!(diag.line, Some(2));
    }

    #[test]
    fn test_alternatives_keep_streams_and_refuse_nesting() {
        let root = "#NAME TV\n#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.a.tv\" ORDER BY bouquet\n";
        let body = "#NAME A\n#SERVICE 1:134:1:0:0:0:0:0:0:0:FROM BOUQUET \"alternatives.x.tv\" ORDER BY bouquet\n";
        let alternatives = "#NAME X
#SERVICE 1:0:1:1:71:2:C00000:0:0:0:
#SERVICE 4097:0:1:0:0:0:0:0:0:0:http%3a//h/a:A
#SERVICE 1:64:1:0:0:0:0:0:0:0::Not here
";
        let dir = write_dir(&[
            ("bouquets.tv", root),
            ("userbouquet.a.tv", body),
            ("alternatives.x.tv", alternatives),
        ]);
        let (roots, _, diags) = load(dir.path());
        let BouquetEntry::Alt(alt) = &roots[0].bouquets[0].entries[0] else {
            panic!("expected alternatives");
        };
        assert_eq!(alt.alt_id, "x");
        assert_eq!(alt.members.len(), 2);
        assert!(matches!(alt.members[1], AltMember::Iptv(_)));
        assert!(diags
            .iter()
            .any(|d| d.kind == DiagnosticKind::Parse && d.line == Some(4)));
        assert!(diags.iter().any(|d| d.kind == DiagnosticKind::Notice));
    }

    #[test]
    fn test_sub_bouquets_and_cycles() {
        let root = "#NAME TV\n#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.a.tv\" ORDER BY bouquet\n";
        let parent = "#NAME Parent\n#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"subbouquet.child.tv\" ORDER BY bouquet\n";
        let child = "#NAME Child
#SERVICE 1:0:1:1:71:2:C00000:0:0:0:
#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"subbouquet.child.tv\" ORDER BY bouquet
";
        let dir = write_dir(&[
            ("bouquets.tv", root),
            ("userbouquet.a.tv", parent),
            ("subbouquet.child.tv", child),
        ]);
        let (roots, services, diags) = load(dir.path());
        let BouquetEntry::SubBouquet(sub) = &roots[0].bouquets[0].entries[0] else {
            panic!("expected sub-bouquet");
        };
        assert_eq!(sub.name, "Child");
        assert_eq!(sub.entries.len(), 1);
        assert!(diags.iter().any(|d| d.file == "subbouquet.child.tv" && d.line == Some(3)));

        let rendered = writer::render(&roots, &services, false);
        let files = files_of(&rendered);
        assert_eq!(files["userbouquet.a.tv"], parent);
        assert_eq!(
            files["subbouquet.child.tv"],
            "#NAME Child\n#SERVICE 1:0:1:1:71:2:C00000:0:0:0:\n"
        );
    }

    #[test]
    fn test_hidden_sub_bouquet_round_trip() {
        let root = "#NAME TV\n#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.a.tv\" ORDER BY bouquet\n";
        let parent = "#NAME Parent
#SERVICE 1:519:1:0:0:0:0:0:0:0:FROM BOUQUET \"subbouquet.kids.tv\" ORDER BY bouquet
#DESCRIPTION Kids
#SERVICE 1:0:1:1:71:2:C00000:0:0:0:
";
        let child = "#NAME Kids\n#SERVICE 1:0:1:1:71:2:C00000:0:0:0:\n";
        let dir = write_dir(&[
            ("bouquets.tv", root),
            ("userbouquet.a.tv", parent),
            ("subbouquet.kids.tv", child),
        ]);
        let (roots, services, diags) = load(dir.path());
        assert!(diags.is_empty(), "{:?}", diags);
        let BouquetEntry::SubBouquet(sub) = &roots[0].bouquets[0].entries[0] else {
            panic!("expected sub-bouquet");
        };
        assert!(sub.hidden);
        assert_eq!(sub.description.as_deref(), Some("Kids"));

        let rendered = writer::render(&roots, &services, false);
        let files = files_of(&rendered);
        assert_eq!(files["userbouquet.a.tv"], parent);
        assert_eq!(files["subbouquet.kids.tv"], child);
    }

    #[test]
    fn test_root_markers() {
        let root = "#NAME TV
#SERVICE 1:64:0:0:0:0:0:0:0:0::Sports
#DESCRIPTION Sports
#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.a.tv\" ORDER BY bouquet
";
        let dir = write_dir(&[("bouquets.tv", root), ("userbouquet.a.tv", "#NAME A\n")]);
        let (roots, services, _) = load(dir.path());
        assert_eq!(roots[0].bouquets[0].kind, BqType::Marker);
        assert_eq!(roots[0].bouquets[0].name, "Sports");

        let rendered = writer::render(&roots, &services, false);
        let files = files_of(&rendered);
        assert_eq!(
            files["bouquets.tv"],
            root.replace("1:64:0:", "1:64:1:").as_str()
        );
    }

    fn new_root(count: usize, ids: &mut IdAllocator, name: impl Fn(usize) -> String) -> BouquetRoot {
        let mut root = BouquetRoot::new(RootKind::Tv);
        for i in 0..count {
            root.bouquets.push(Bouquet::new(ids.next_id(), name(i), BqType::Tv));
        }
        root
    }

    #[test]
    fn test_new_bouquets_are_numbered() {
        let mut ids = IdAllocator::default();
        let root = new_root(100, &mut ids, |i| format!("Bouquet {}", i));
        let rendered = writer::render(&[root], &ServiceTable::new(), false);
        let names: Vec<&str> = rendered.assigned.iter().map(|(_, f)| f.as_str()).collect();
        assert_eq!(names.len(), 100);
        assert_eq!(names[0], "userbouquet.de01.tv");
        assert_eq!(names[9], "userbouquet.de10.tv");
        assert_eq!(names[99], "userbouquet.de100.tv");
    }

    #[test]
    fn test_numbering_skips_taken_files() {
        let mut ids = IdAllocator::default();
        let mut root = new_root(2, &mut ids, |i| format!("B{}", i));
        root.bouquets[1].file = Some("userbouquet.de01.tv".to_string());
        let rendered = writer::render(&[root], &ServiceTable::new(), false);
        assert_eq!(rendered.assigned[0].1, "userbouquet.de02.tv");
        assert_eq!(rendered.assigned[1].1, "userbouquet.de01.tv");
    }

    #[test]
    fn test_forced_names_and_locks() {
        let mut ids = IdAllocator::default();
        let mut root = new_root(2, &mut ids, |_| "My News!".to_string());
        root.bouquets[0].locked = true;
        let rendered = writer::render(&[root], &ServiceTable::new(), true);
        assert_eq!(rendered.assigned[0].1, "userbouquet.My_News_.tv");
        assert_eq!(rendered.assigned[1].1, "userbouquet.My_News__1.tv");
        assert_eq!(
            rendered.locked_headers,
            vec!["1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.My_News_.tv\" ORDER BY bouquet".to_string()]
        );
    }

    #[test]
    fn test_entries_created_in_memory() {
        let services = table();
        let mut ids = IdAllocator::default();
        let mut root = new_root(1, &mut ids, |_| "New".to_string());
        root.bouquets[0].entries = vec![
            BouquetEntry::Service(ServiceRef::new("1:71:2:C00000")),
            BouquetEntry::Space,
            BouquetEntry::Service(ServiceRef::new("2:85:1:C00000")),
            BouquetEntry::Alt(AltGroup {
                alt_id: String::new(),
                name: "Pair".to_string(),
                members: vec![AltMember::Service(ServiceRef::new("1:71:2:C00000"))],
            }),
        ];
        let rendered = writer::render(&[root], &services, false);
        let files = files_of(&rendered);
        assert_eq!(
            files["userbouquet.de01.tv"],
            "#NAME New
#SERVICE 1:0:1:1:71:2:C00000:0:0:0:
#SERVICE 1:832:D:1:0:0:0:0:0:0:
#SERVICE 1:0:2:2:85:1:C00000:0:0:0:
#SERVICE 1:134:1:0:0:0:0:0:0:0:FROM BOUQUET \"alternatives.de01.tv\" ORDER BY bouquet
"
        );
        assert_eq!(
            files["alternatives.de01.tv"],
            "#NAME Pair\n#SERVICE 1:0:1:1:71:2:C00000:0:0:0:\n"
        );
    }
}
