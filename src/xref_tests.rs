//! Tests for cross-reference mutations

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::config::SaveOptions;
    use crate::error::{Error, InvariantViolation};
    use crate::iptv::ReferenceBits;
    use crate::lamedb::LamedbVersion;
    use crate::model::Model;
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
0003:00c00000:0071:0002:1:0
Third
p:Pkg
0002:00c00000:0085:0001:2:0
Radio One
p:Radio
end
Have a lot of bugs!
";

    const ROOT_TV: &str = "#NAME User - bouquets (TV)
#SERVICE 1:7:1:0:0:0:0:0:0:0:FROM BOUQUET \"userbouquet.favourites.tv\" ORDER BY bouquet
";

    const FAVOURITES: &str = "#NAME Favourites
#SERVICE 1:0:1:1:71:2:C00000:0:0:0::Demo Local
#SERVICE 1:0:1:3:71:2:C00000:0:0:0:
#SERVICE 4097:0:1:0:0:0:0:0:0:0:http%3a//host/s.m3u8:Channel X
#DESCRIPTION Channel X
#SERVICE 1:134:1:0:0:0:0:0:0:0:FROM BOUQUET \"alternatives.de01.tv\" ORDER BY bouquet
";

    const ALTERNATIVES: &str = "#NAME Demo
#SERVICE 1:0:1:1:71:2:C00000:0:0:0:
#SERVICE 1:0:2:2:85:1:C00000:0:0:0:
";

    const STREAM: &str = "4097:0:1:0:0:0:0:0:0:0:http%3a//host/s.m3u8:Channel X";
    const DEMO: &str = "1:71:2:C00000";
    const THIRD: &str = "3:71:2:C00000";
    const RADIO: &str = "2:85:1:C00000";

    fn model() -> Model {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lamedb"), LAMEDB).unwrap();
        fs::write(dir.path().join("bouquets.tv"), ROOT_TV).unwrap();
        fs::write(dir.path().join("userbouquet.favourites.tv"), FAVOURITES).unwrap();
        fs::write(dir.path().join("alternatives.de01.tv"), ALTERNATIVES).unwrap();
        fs::write(
            dir.path().join("blacklist"),
            format!("1:0:1:3:71:2:C00000:0:0:0:\n{}\n", STREAM),
        )
        .unwrap();
        let (model, diags) = Model::load(dir.path(), LamedbVersion::V4);
        assert!(!diags.has_blocking(), "{:?}", diags);
        model
    }

    fn favourites(model: &Model) -> BouquetId {
        model.roots[0].bouquets[0].id
    }

    fn entries(model: &Model) -> &[BouquetEntry] {
        &model.roots[0].bouquets[0].entries
    }

    fn alt(model: &Model) -> &AltGroup {
        entries(model)
            .iter()
            .find_map(|e| match e {
                BouquetEntry::Alt(alt) => Some(alt),
                _ => None,
            })
            .expect("alternatives entry")
    }

    fn violation<T: std::fmt::Debug>(result: crate::error::Result<T>) -> InvariantViolation {
        match result {
            Err(Error::Invariant(v)) => v,
            other => panic!("expected an invariant violation, got {:?}", other),
        }
    }

    #[test]
    fn test_loaded_fixture() {
        let model = model();
        assert!(!model.is_dirty());
        assert_eq!(entries(&model).len(), 4);
        assert_eq!(alt(&model).members.len(), 2);
        assert!(model.is_locked(THIRD));
        assert!(model.is_locked(STREAM));
    }

    #[test]
    fn test_rename_drops_matching_extra_name() {
        let mut model = model();
        model.rename_service(DEMO, "Something").unwrap();
        let BouquetEntry::Service(first) = &entries(&model)[0] else {
            panic!("expected a service");
        };
        assert_eq!(first.extra_name.as_deref(), Some("Demo Local"));
        assert!(model.is_dirty());

        model.rename_service(DEMO, "Demo Local").unwrap();
        let BouquetEntry::Service(first) = &entries(&model)[0] else {
            panic!("expected a service");
        };
        assert_eq!(first.extra_name, None);
        assert_eq!(model.service(DEMO).unwrap().name, "Demo Local");
    }

    #[test]
    fn test_rename_stream_rekeys() {
        let mut model = model();
        model.rename_service(STREAM, "Channel Y").unwrap();
        let renamed = "4097:0:1:0:0:0:0:0:0:0:http%3a//host/s.m3u8:Channel Y";
        assert!(model.service(STREAM).is_none());
        assert_eq!(model.service(renamed).unwrap().name, "Channel Y");
        let BouquetEntry::Iptv(entry) = &entries(&model)[2] else {
            panic!("expected a stream");
        };
        assert_eq!(entry.fav_id, renamed);
        assert_eq!(entry.description.as_deref(), Some("Channel Y"));
        assert!(model.is_locked(renamed));
    }

    #[test]
    fn test_rename_unknown_service() {
        let mut model = model();
        assert_eq!(
            violation(model.rename_service("9:9:9:0", "x")),
            InvariantViolation::MissingReference("9:9:9:0".to_string())
        );
    }

    #[test]
    fn test_reassign_stream_reference() {
        let mut model = model();
        let bits = ReferenceBits {
            service_type: 1,
            ssid: 0x10,
            tsid: 2,
            onid: 3,
            namespace: 0xE000000,
        };
        let new_id = model.reassign_iptv_reference(STREAM, bits).unwrap();
        assert_eq!(new_id, "4097:0:1:10:2:3:E000000:0:0:0:http%3a//host/s.m3u8:Channel X");

        let service = model.service(&new_id).unwrap();
        assert_eq!(service.data_id(), "4097:0:1:10:2:3:E000000:0:0:0");
        assert_eq!(service.picon_id(), "4097_0_1_10_2_3_E000000_0_0_0.png");
        assert_eq!(entries(&model)[2].fav_id(), Some(new_id.as_str()));
        assert!(model.is_locked(&new_id));
        assert!(!model.is_locked(STREAM));

        // The same stream added again keeps the old key; moving it onto
        // the reassigned one collides.
        let id = favourites(&model);
        let again = model.add_iptv(id, "Channel X", "http://host/s.m3u8", 4097, None).unwrap();
        assert_eq!(again, STREAM);
        let before = model.data_hash();
        assert_eq!(
            violation(model.reassign_iptv_reference(STREAM, bits)),
            InvariantViolation::DuplicateFavId(new_id.clone())
        );
        assert_eq!(model.data_hash(), before);
        assert!(model.service(STREAM).is_some());
    }

    #[test]
    fn test_reassign_requires_stream() {
        let mut model = model();
        assert!(matches!(
            violation(model.reassign_iptv_reference(DEMO, ReferenceBits::default())),
            InvariantViolation::InvalidReference(_)
        ));
    }

    #[test]
    fn test_move_entries() {
        let mut model = model();
        let id = favourites(&model);
        model.move_bouquet_entries(id, 0, 2).unwrap();
        let order: Vec<Option<&str>> = entries(&model).iter().map(|e| e.fav_id()).collect();
        assert_eq!(order, vec![Some(THIRD), Some(STREAM), Some(DEMO), None]);
        assert_eq!(
            violation(model.move_bouquet_entries(id, 0, 4)),
            InvariantViolation::IndexOutOfRange { index: 4, len: 4 }
        );
        assert_eq!(
            violation(model.move_bouquet_entries(BouquetId(999), 0, 1)),
            InvariantViolation::MissingBouquet(BouquetId(999))
        );
    }

    #[test]
    fn test_add_then_delete_alternatives_restores_bouquet() {
        let mut model = model();
        let id = favourites(&model);
        let before = entries(&model).to_vec();
        let hash = model.data_hash();

        let alt_id = model.add_alternatives(THIRD, id).unwrap();
        assert_eq!(alt_id, "de02");
        let BouquetEntry::Alt(group) = &entries(&model)[1] else {
            panic!("expected alternatives");
        };
        assert_eq!(group.name, "Third");
        assert_eq!(group.members.len(), 1);

        model.delete_alt_group(&alt_id).unwrap();
        assert_eq!(entries(&model), before.as_slice());
        assert_eq!(model.data_hash(), hash);
    }

    #[test]
    fn test_delete_alt_group_keeps_first_survivor() {
        let mut model = model();
        model.delete_alt_group("de01").unwrap();
        let BouquetEntry::Service(first) = &entries(&model)[3] else {
            panic!("expected the first member back");
        };
        assert_eq!(first.fav_id, DEMO);
        assert!(model.service(RADIO).is_some());

        let output = model.render(&SaveOptions::default()).unwrap();
        assert!(!output.writes("alternatives.de01.tv"));
        assert!(output.writes("userbouquet.favourites.tv"));
        assert_eq!(
            violation(model.delete_alt_group("de01")),
            InvariantViolation::MissingReference("de01".to_string())
        );
    }

    #[test]
    fn test_alternatives_membership() {
        let mut model = model();
        model.add_to_alternatives("de01", THIRD).unwrap();
        assert_eq!(alt(&model).members.len(), 3);
        model.add_to_alternatives("de01", THIRD).unwrap();
        assert_eq!(alt(&model).members.len(), 3);

        model.remove_from_alternatives("de01", DEMO).unwrap();
        model.remove_from_alternatives("de01", RADIO).unwrap();
        assert_eq!(
            violation(model.remove_from_alternatives("de01", THIRD)),
            InvariantViolation::EmptyAlternatives("de01".to_string())
        );
        assert_eq!(
            violation(model.add_to_alternatives("de01", "de01")),
            InvariantViolation::NestedAlternatives("de01".to_string())
        );
    }

    #[test]
    fn test_delete_service_cascades() {
        let mut model = model();
        let removed = model.delete_service(THIRD).unwrap();
        assert_eq!(removed.name, "Third");
        assert!(model.service(THIRD).is_none());
        assert!(!model.is_locked(THIRD));
        assert!(model.bouquets().all(|(_, b)| !b.contains(THIRD)));

        // Nothing else moved.
        assert!(model.service(DEMO).is_some());
        assert!(model.is_locked(STREAM));
        assert_eq!(entries(&model).len(), 3);

        model.delete_service(DEMO).unwrap();
        assert_eq!(entries(&model).len(), 2);
        assert_eq!(alt(&model).members.len(), 1);
        let output = model.render(&SaveOptions::default()).unwrap();
        assert!(output.writes("alternatives.de01.tv"));
    }

    #[test]
    fn test_delete_refuses_to_empty_alternatives() {
        let mut model = model();
        let hash = model.data_hash();
        assert_eq!(
            violation(model.delete_services(&[DEMO, RADIO])),
            InvariantViolation::EmptyAlternatives("de01".to_string())
        );
        assert_eq!(model.data_hash(), hash);
        assert!(model.service(DEMO).is_some());

        model.delete_alt_group("de01").unwrap();
        assert_eq!(model.delete_services(&[DEMO, RADIO]).unwrap().len(), 2);
    }

    #[test]
    fn test_bouquet_management() {
        let mut model = model();
        let id = model.add_bouquet(RootKind::Tv, "Favourites").unwrap();
        assert_eq!(model.bouquet(id).unwrap().name, "Favourites 1");
        assert_eq!(model.rename_bouquet(id, "Sport").unwrap(), "Sport");

        assert_eq!(model.add_services(id, &[DEMO, STREAM], None).unwrap(), 2);
        model.add_marker(id, "Top", Some(0)).unwrap();
        model.add_space(id, None).unwrap();
        let stream = model.add_iptv(id, "Radio Z", "http://r/z", 4097, None).unwrap();
        assert_eq!(stream, "4097:0:1:0:0:0:0:0:0:0:http%3a//r/z:Radio Z");
        assert!(model.service(&stream).unwrap().is_iptv());

        let kinds: Vec<ServiceType> = model
            .bouquet(id)
            .unwrap()
            .entries
            .iter()
            .map(|e| e.service_type())
            .collect();
        assert_eq!(
            kinds,
            vec![
                ServiceType::Marker,
                ServiceType::Unknown,
                ServiceType::Iptv,
                ServiceType::Space,
                ServiceType::Iptv
            ]
        );

        assert_eq!(
            violation(model.remove_entries(id, &[1, 7])),
            InvariantViolation::IndexOutOfRange { index: 7, len: 5 }
        );
        let removed = model.remove_entries(id, &[4, 0]).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(model.service(&stream).is_none());
        // Still held by the favourites bouquet.
        assert!(model.service(STREAM).is_some());

        model.set_bouquet_hidden(id, true).unwrap();
        model.set_bouquet_locked(id, true).unwrap();
        let bouquet = model.remove_bouquet(id).unwrap();
        assert!(bouquet.hidden && bouquet.locked);
        assert!(model.bouquet(id).is_none());
    }

    #[test]
    fn test_removing_last_stream_entry_drops_lock() {
        let mut model = model();
        let id = favourites(&model);
        model.remove_entries(id, &[2]).unwrap();
        assert!(model.service(STREAM).is_none());
        assert!(!model.is_locked(STREAM));
    }

    #[test]
    fn test_extra_names() {
        let mut model = model();
        let id = favourites(&model);
        model.set_extra_name(id, 1, Some("Third Local")).unwrap();
        let BouquetEntry::Service(entry) = &entries(&model)[1] else {
            panic!("expected a service");
        };
        assert_eq!(entry.extra_name.as_deref(), Some("Third Local"));
        assert_eq!(entry.description.as_deref(), Some("Third Local"));
        assert_eq!(model.entry_name(&entries(&model)[1]), "Third Local");

        model.set_extra_name(id, 1, Some("Third")).unwrap();
        assert_eq!(model.entry_name(&entries(&model)[1]), "Third");
        let BouquetEntry::Service(entry) = &entries(&model)[1] else {
            panic!("expected a service");
        };
        assert_eq!(entry.extra_name, None);

        assert!(matches!(
            violation(model.set_extra_name(id, 3, Some("x"))),
            InvariantViolation::InvalidReference(_)
        ));
    }

    #[test]
    fn test_locks_flags_and_relay() {
        let mut model = model();
        model.set_service_locked(DEMO, true).unwrap();
        assert!(model.blacklist.is_locked(DEMO));
        assert!(model.service(DEMO).unwrap().flags().is_lock());

        model.set_service_locked(DEMO, false).unwrap();
        assert!(!model.is_locked(DEMO));
        assert_eq!(model.service(DEMO).unwrap().flags_cas, "p:Pkg");

        model.set_service_hidden(RADIO, true).unwrap();
        assert!(model.service(RADIO).unwrap().is_hidden());
        assert!(matches!(
            violation(model.set_service_hidden(STREAM, true)),
            InvariantViolation::Unsupported(_)
        ));

        assert!(model.set_stream_relay(DEMO, true).unwrap());
        assert!(!model.set_stream_relay(DEMO, true).unwrap());
        assert!(model.stream_relay.contains(DEMO));
        model.delete_service(THIRD).unwrap();
        assert!(model.stream_relay.contains(DEMO));
        model.delete_alt_group("de01").unwrap();
        model.delete_service(DEMO).unwrap();
        assert!(model.stream_relay.is_empty());
    }

    #[test]
    fn test_neutrino_rejects_enigma_entries() {
        let mut model = Model::new(SettingsKind::Neutrino);
        let id = model.add_bouquet(RootKind::Tv, "Favourites").unwrap();
        assert!(matches!(
            violation(model.add_marker(id, "Top", None)),
            InvariantViolation::Unsupported(_)
        ));
        assert!(matches!(
            violation(model.add_iptv(id, "S", "http://h/s", 4097, None)),
            InvariantViolation::Unsupported(_)
        ));

        let webtv = model.add_bouquet(RootKind::WebTv, "WebTV").unwrap();
        let fav = model.add_iptv(webtv, "News", "http://h/news", 4097, None).unwrap();
        assert_eq!(fav, "http://h/news::None::None::None::None::None::None::None::None::None");
        assert!(matches!(
            violation(model.add_services(id, &[fav.as_str()], None)),
            InvariantViolation::Unsupported(_)
        ));
        assert!(model.add_bouquet(RootKind::Radio, "x").is_err());
    }
}
