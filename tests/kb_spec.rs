use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use birdkb::models::*;
use birdkb::store::KnowledgeBase;
use birdkb::Error;
use speculate2::speculate;

/// Color (enum Red/Blue), Size (range 0..=10), Habitat (enum Forest) and a
/// Sparrow for which Color and Size apply.
fn populate(kb: &KnowledgeBase) {
    kb.add_feature("Color").expect("Failed to add feature");
    kb.add_feature("Size").expect("Failed to add feature");
    kb.add_feature("Habitat (habitat)").expect("Failed to add feature");
    kb.add_enum_value("color", "Red").expect("Failed to add value");
    kb.add_enum_value("color", "Blue").expect("Failed to add value");
    kb.set_range("size", 0, 10).expect("Failed to set range");
    kb.add_enum_value("habitat", "Forest").expect("Failed to add value");
    kb.add_species("Sparrow").expect("Failed to add species");
    kb.set_applicability(
        "Sparrow",
        BTreeMap::from([
            ("color".to_string(), true),
            ("size".to_string(), true),
            ("habitat".to_string(), false),
        ]),
    )
    .expect("Failed to set applicability");
}

fn values(pairs: &[(&str, Option<FeatureValue>)]) -> BTreeMap<String, Option<FeatureValue>> {
    pairs
        .iter()
        .map(|(code, value)| (code.to_string(), value.clone()))
        .collect()
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("Failed to read table")
}

speculate! {
    before {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let kb = KnowledgeBase::open(dir.path()).expect("Failed to open knowledge base");
    }

    describe "feature registry" {
        it "starts empty without stored tables" {
            assert!(kb.list_features().is_empty());
        }

        it "derives codes from labels" {
            let plain = kb.add_feature("Color").expect("Failed").expect("Not added");
            let coded = kb.add_feature("Beak type (beak_type)").expect("Failed").expect("Not added");
            assert_eq!(plain.code, "color");
            assert_eq!(coded.code, "beak_type");
        }

        it "ignores duplicate and empty labels" {
            kb.add_feature("Color").expect("Failed");
            assert!(kb.add_feature("Color").expect("Failed").is_none());
            assert!(kb.add_feature("   ").expect("Failed").is_none());
            assert_eq!(kb.list_features().len(), 1);
        }

        it "starts new features as enumerable with an empty value file" {
            kb.add_feature("Color").expect("Failed");
            assert_eq!(kb.get_setting("color").expect("Failed"), ValueSetting::Enum { values: vec![] });
            assert_eq!(read(&dir.path().join("color_values.csv")).trim(), "label");
        }

        it "keeps registration order" {
            kb.add_feature("Zeta").expect("Failed");
            kb.add_feature("Alpha").expect("Failed");
            let codes: Vec<_> = kb.list_features().into_iter().map(|f| f.code).collect();
            assert_eq!(codes, vec!["zeta", "alpha"]);
        }

        it "removes a feature and its value setting but leaves table columns" {
            populate(&kb);
            kb.set_values("Sparrow", values(&[
                ("color", Some("Red".into())),
                ("size", Some(FeatureValue::Number(4))),
            ])).expect("Failed to save values");

            let removed = kb.remove_feature("Color").expect("Failed").expect("Not removed");
            assert_eq!(removed.code, "color");
            assert!(kb.get_feature("Color").is_none());
            assert!(!dir.path().join("color_values.csv").exists());
            assert!(matches!(kb.get_setting("color"), Err(Error::UnknownFeature(_))));

            let reopened = KnowledgeBase::open(dir.path()).expect("Failed to reopen");
            assert!(reopened.feature_by_code("color").is_none());
            assert_eq!(reopened.get_applicability("Sparrow").get("color"), Some(&true));
            assert_eq!(
                reopened.get_values("Sparrow").get("color"),
                Some(&Some(FeatureValue::Label("Red".into())))
            );
            assert!(read(&dir.path().join("species_features.csv")).starts_with("species,color,"));
        }

        it "drops the range of a removed numeric feature" {
            populate(&kb);
            kb.remove_feature("Size").expect("Failed");
            assert!(!read(&dir.path().join("ranges.csv")).contains("size"));
            assert!(!read(&dir.path().join("val_types.csv")).contains("size"));
        }

        it "rejects codes that would leave the data directory" {
            let root = tempfile::tempdir().expect("Failed to create temp dir");
            let kb = KnowledgeBase::open(root.path().join("kb")).expect("Failed to open");

            for label in ["Bad (no/such)", "Evil (../escaped)", "Wing/tail ratio", "Back (a\\b)"] {
                assert!(
                    matches!(kb.add_feature(label), Err(Error::InvalidFeatureCode(_))),
                    "{} accepted",
                    label
                );
            }

            assert!(kb.list_features().is_empty());
            assert!(!root.path().join("escaped_values.csv").exists());
            let reopened = KnowledgeBase::open(root.path().join("kb")).expect("Failed to reopen");
            assert!(reopened.list_features().is_empty());

            kb.add_feature("Color").expect("Failed").expect("Not added");
            kb.add_enum_value("color", "Red").expect("Settings stay writable");
        }

        it "leaves the registry unchanged when a write fails" {
            fs::create_dir(dir.path().join("color_values.csv")).expect("Failed to create dir");

            assert!(kb.add_feature("Color").is_err());
            assert!(kb.list_features().is_empty());
            assert!(kb.get_feature("Color").is_none());

            let reopened = KnowledgeBase::open(dir.path()).expect("Failed to reopen");
            assert!(reopened.list_features().is_empty());
        }

        it "returns None when removing an unknown feature" {
            assert!(kb.remove_feature("Nope").expect("Failed").is_none());
            assert!(kb.remove_feature_at(3).expect("Failed").is_none());
        }
    }

    describe "value settings" {
        it "round trips ranges" {
            kb.add_feature("Size").expect("Failed");
            for (min, max) in [(0, 100), (-5, 5), (7, 7), (80, 220)] {
                kb.set_range("size", min, max).expect("Failed to set range");
                assert_eq!(kb.get_range("size").expect("Failed"), Some((min, max)));
            }
        }

        it "rejects inverted ranges" {
            kb.add_feature("Size").expect("Failed");
            assert!(matches!(
                kb.set_range("size", 10, 1),
                Err(Error::InvalidRange { min: 10, max: 1 })
            ));
        }

        it "rejects settings for unknown features" {
            assert!(matches!(kb.set_range("ghost", 0, 1), Err(Error::UnknownFeature(_))));
            assert!(matches!(kb.add_enum_value("ghost", "x"), Err(Error::UnknownFeature(_))));
        }

        it "appends enum values and ignores duplicates" {
            kb.add_feature("Color").expect("Failed");
            assert!(kb.add_enum_value("color", "Red").expect("Failed"));
            assert!(kb.add_enum_value("color", "Blue").expect("Failed"));
            assert!(!kb.add_enum_value("color", "Red").expect("Failed"));
            assert!(!kb.add_enum_value("color", "").expect("Failed"));
            assert_eq!(
                kb.get_setting("color").expect("Failed").enum_values(),
                Some(&["Red".to_string(), "Blue".to_string()][..])
            );
        }

        it "removes enum values by position" {
            kb.add_feature("Color").expect("Failed");
            kb.add_enum_value("color", "Red").expect("Failed");
            kb.add_enum_value("color", "Blue").expect("Failed");

            assert_eq!(kb.remove_enum_value("color", 0).expect("Failed"), Some("Red".to_string()));
            assert_eq!(kb.remove_enum_value("color", 5).expect("Failed"), None);
            assert_eq!(read(&dir.path().join("color_values.csv")), "label\nBlue\n");
        }

        it "discards enum values when switching to numeric" {
            kb.add_feature("Color").expect("Failed");
            kb.add_enum_value("color", "Red").expect("Failed");

            let setting = kb.set_kind("color", ValueKind::Numeric).expect("Failed");
            assert_eq!(setting, ValueSetting::Range { min: 0, max: 100 });
            assert!(!dir.path().join("color_values.csv").exists());

            let setting = kb.set_kind("color", ValueKind::Enumerable).expect("Failed");
            assert_eq!(setting, ValueSetting::Enum { values: vec![] });
            assert!(!read(&dir.path().join("ranges.csv")).contains("color"));
        }

        it "keeps the previous setting when a write fails" {
            kb.add_feature("Size").expect("Failed");
            fs::remove_file(dir.path().join("ranges.csv")).expect("Failed to remove");
            fs::create_dir(dir.path().join("ranges.csv")).expect("Failed to create dir");

            assert!(kb.set_range("size", 1, 9).is_err());
            assert_eq!(kb.get_setting("size").expect("Failed"), ValueSetting::default());
            assert!(dir.path().join("size_values.csv").exists());
        }

        it "refuses enum edits on numeric features" {
            kb.add_feature("Size").expect("Failed");
            kb.set_range("size", 1, 2).expect("Failed");
            assert!(matches!(
                kb.add_enum_value("size", "Big"),
                Err(Error::KindMismatch { .. })
            ));
        }

        it "persists kinds ranges and values" {
            populate(&kb);
            let reopened = KnowledgeBase::open(dir.path()).expect("Failed to reopen");
            assert_eq!(reopened.feature_domains(), kb.feature_domains());
            assert_eq!(read(&dir.path().join("val_types.csv")),
                "code,type\ncolor,enumerable\nhabitat,enumerable\nsize,numeric\n");
        }
    }

    describe "taxonomy" {
        it "adds species once" {
            assert!(kb.add_species("Sparrow").expect("Failed"));
            assert!(!kb.add_species("Sparrow").expect("Failed"));
            assert_eq!(kb.list_species(), vec!["Sparrow"]);
        }

        it "removes species by position" {
            kb.add_species("Sparrow").expect("Failed");
            kb.add_species("Robin").expect("Failed");
            assert_eq!(kb.remove_species_at(0).expect("Failed"), Some("Sparrow".to_string()));
            assert_eq!(kb.remove_species_at(4).expect("Failed"), None);
            assert_eq!(read(&dir.path().join("classes.csv")), "species\nRobin\n");
        }

        it "keeps table rows of removed species until pruned" {
            populate(&kb);
            assert!(kb.remove_species("Sparrow").expect("Failed"));
            assert_eq!(kb.get_applicability("Sparrow").get("color"), Some(&true));

            let report = kb.prune().expect("Failed to prune");
            assert_eq!(report.dropped_rows, vec!["Sparrow"]);
            assert!(kb.get_applicability("Sparrow").is_empty());
        }
    }

    describe "applicability" {
        it "is empty for species without a row" {
            kb.add_species("Robin").expect("Failed");
            assert!(kb.get_applicability("Robin").is_empty());
            assert!(!kb.is_applicable("Robin", "color"));
        }

        it "upserts by species" {
            populate(&kb);
            kb.set_applicability("Sparrow", BTreeMap::from([("size".to_string(), false)]))
                .expect("Failed");
            let flags = kb.get_applicability("Sparrow");
            assert_eq!(flags.get("color"), Some(&true));
            assert_eq!(flags.get("size"), Some(&false));
        }

        it "requires known species and features" {
            populate(&kb);
            assert!(matches!(
                kb.set_applicability("Dodo", BTreeMap::new()),
                Err(Error::UnknownSpecies(_))
            ));
            assert!(matches!(
                kb.set_applicability("Sparrow", BTreeMap::from([("ghost".to_string(), true)])),
                Err(Error::UnknownFeature(_))
            ));
        }
    }

    describe "feature values" {
        it "stores values for a species with an enumerable feature" {
            kb.add_feature("Color").expect("Failed");
            kb.set_kind("color", ValueKind::Enumerable).expect("Failed");
            kb.add_enum_value("color", "Red").expect("Failed");
            kb.add_enum_value("color", "Blue").expect("Failed");
            kb.add_species("Sparrow").expect("Failed");
            kb.set_applicability("Sparrow", BTreeMap::from([("color".to_string(), true)]))
                .expect("Failed");

            kb.set_values("Sparrow", values(&[("color", Some("Red".into()))]))
                .expect("Failed to save values");

            assert_eq!(kb.get_values("Sparrow"), values(&[("color", Some("Red".into()))]));
        }

        it "maps every code to null for species without a row" {
            populate(&kb);
            assert_eq!(
                kb.get_values("Sparrow"),
                values(&[("color", None), ("size", None), ("habitat", None)])
            );
        }

        it "does not require inapplicable features" {
            populate(&kb);
            kb.set_values("Sparrow", values(&[
                ("color", Some("Blue".into())),
                ("size", Some(FeatureValue::Number(3))),
            ])).expect("Inapplicable habitat should not be required");
        }

        it "lists exactly the missing labels and writes nothing" {
            populate(&kb);
            kb.set_values("Sparrow", values(&[
                ("color", Some("Red".into())),
                ("size", Some(FeatureValue::Number(4))),
            ])).expect("Failed to save values");
            let before = read(&dir.path().join("birds_data.csv"));

            let err = kb.set_values("Sparrow", values(&[
                ("color", Some("".into())),
                ("size", None),
                ("habitat", Some("Forest".into())),
            ])).unwrap_err();

            match err {
                Error::MissingValues { labels } => assert_eq!(labels, vec!["Color", "Size"]),
                other => panic!("unexpected error: {}", other),
            }
            assert_eq!(read(&dir.path().join("birds_data.csv")), before);
            assert_eq!(
                kb.get_values("Sparrow").get("color"),
                Some(&Some(FeatureValue::Label("Red".into())))
            );
        }

        it "rejects values outside the domain" {
            populate(&kb);
            let err = kb.set_values("Sparrow", values(&[
                ("color", Some("Green".into())),
                ("size", Some(FeatureValue::Number(4))),
            ])).unwrap_err();
            assert!(matches!(err, Error::OutOfDomain { ref label, .. } if label == "Color"));

            let err = kb.set_values("Sparrow", values(&[
                ("color", Some("Red".into())),
                ("size", Some(FeatureValue::Number(11))),
            ])).unwrap_err();
            assert!(matches!(err, Error::OutOfDomain { ref label, .. } if label == "Size"));
            assert!(!dir.path().join("birds_data.csv").exists());
        }

        it "ignores values of inapplicable features" {
            populate(&kb);
            kb.set_values("Sparrow", values(&[
                ("color", Some("Red".into())),
                ("size", Some(FeatureValue::Number(4))),
                ("habitat", Some("Forest".into())),
            ])).expect("Failed to save values");
            assert_eq!(kb.get_values("Sparrow").get("habitat"), Some(&None));
        }

        it "keeps numeric looking enum labels as labels after reopening" {
            kb.add_feature("Band").expect("Failed");
            let labels = ["007", "1.0", "+5"];
            for (i, label) in labels.iter().enumerate() {
                kb.add_enum_value("band", label).expect("Failed to add value");
                let species = format!("Bird {}", i);
                kb.add_species(&species).expect("Failed");
                kb.set_applicability(&species, BTreeMap::from([("band".to_string(), true)]))
                    .expect("Failed");
                kb.set_values(&species, values(&[("band", Some((*label).into()))]))
                    .expect("Failed to save values");
            }

            let reopened = KnowledgeBase::open(dir.path()).expect("Failed to reopen");
            for (i, label) in labels.iter().enumerate() {
                let species = format!("Bird {}", i);
                assert_eq!(
                    reopened.get_values(&species).get("band"),
                    Some(&Some(FeatureValue::Label(label.to_string())))
                );
                assert_eq!(reopened.get_values(&species), kb.get_values(&species));
            }
            assert!(reopened.domain_violations().is_empty());
        }

        it "stores numeric values as numbers whatever their input form" {
            populate(&kb);
            kb.set_values("Sparrow", values(&[
                ("color", Some("Red".into())),
                ("size", Some("7".into())),
            ])).expect("Failed to save values");

            assert_eq!(kb.get_values("Sparrow")["size"], Some(FeatureValue::Number(7)));
            let reopened = KnowledgeBase::open(dir.path()).expect("Failed to reopen");
            assert_eq!(reopened.get_values("Sparrow"), kb.get_values("Sparrow"));
        }

        it "reports values left outside a changed domain" {
            populate(&kb);
            kb.set_values("Sparrow", values(&[
                ("color", Some("Red".into())),
                ("size", Some(FeatureValue::Number(9))),
            ])).expect("Failed to save values");
            kb.set_range("size", 0, 5).expect("Failed");

            assert_eq!(kb.domain_violations(), vec![DomainViolation {
                species: "Sparrow".into(),
                code: "size".into(),
                value: FeatureValue::Number(9),
            }]);
        }
    }

    describe "persistence" {
        it "reloads the same logical content" {
            populate(&kb);
            kb.add_species("Robin").expect("Failed");
            kb.set_values("Sparrow", values(&[
                ("color", Some("Blue".into())),
                ("size", Some(FeatureValue::Number(7))),
            ])).expect("Failed to save values");

            let reopened = KnowledgeBase::open(dir.path()).expect("Failed to reopen");
            assert_eq!(reopened.list_features(), kb.list_features());
            assert_eq!(reopened.list_species(), kb.list_species());
            assert_eq!(reopened.get_applicability("Sparrow"), kb.get_applicability("Sparrow"));
            assert_eq!(reopened.get_values("Sparrow"), kb.get_values("Sparrow"));
            assert_eq!(reopened.get_values("Robin"), kb.get_values("Robin"));
            assert_eq!(reopened.data_dir(), dir.path());
        }

        it "derives the registry from the label list when the map is missing" {
            fs::write(dir.path().join("features.csv"), "feature\nColor\nWing span (wing)\n")
                .expect("Failed to write");
            let reopened = KnowledgeBase::open(dir.path()).expect("Failed to reopen");
            let codes: Vec<_> = reopened.list_features().into_iter().map(|f| f.code).collect();
            assert_eq!(codes, vec!["color", "wing"]);
        }

        it "seeds the default bird features only when asked" {
            let other = tempfile::tempdir().expect("Failed to create temp dir");
            let seeded = KnowledgeBase::open_seeded(other.path()).expect("Failed to open");
            assert_eq!(seeded.list_features().len(), 6);
            assert_eq!(seeded.get_setting("body_size").expect("Failed"), ValueSetting::default());
        }

        it "fails fast on malformed tables" {
            let other = tempfile::tempdir().expect("Failed to create temp dir");
            fs::write(other.path().join("species_features.csv"), "species,color\nSparrow,perhaps\n")
                .expect("Failed to write");
            assert!(matches!(
                KnowledgeBase::open(other.path()),
                Err(Error::MalformedTable { .. })
            ));
        }

        it "fails fast on rows with the wrong number of fields" {
            let other = tempfile::tempdir().expect("Failed to create temp dir");
            fs::write(other.path().join("birds_data.csv"), "species,color\nSparrow,Red,extra\n")
                .expect("Failed to write");
            assert!(matches!(
                KnowledgeBase::open(other.path()),
                Err(Error::MalformedTable { row: 1, .. })
            ));
        }

        it "types pandas float cells of numeric features as numbers" {
            let other = tempfile::tempdir().expect("Failed to create temp dir");
            fs::write(other.path().join("feature_map.csv"),
                "label,code\nBody size (body_size),body_size\nBand,band\n").expect("Failed");
            fs::write(other.path().join("ranges.csv"), "code,min,max\nbody_size,80,220\n").expect("Failed");
            fs::write(other.path().join("band_values.csv"), "label\n1.0\n").expect("Failed");
            fs::write(other.path().join("classes.csv"), "species\nSparrow\n").expect("Failed");
            fs::write(other.path().join("birds_data.csv"),
                "species,body_size,band\nSparrow,150.0,1.0\n").expect("Failed");

            let legacy = KnowledgeBase::open(other.path()).expect("Failed to open");
            let stored = legacy.get_values("Sparrow");
            assert_eq!(stored["body_size"], Some(FeatureValue::Number(150)));
            assert_eq!(stored["band"], Some(FeatureValue::Label("1.0".into())));
            assert!(legacy.domain_violations().is_empty());
        }

        it "reads tables written by the original editor" {
            let other = tempfile::tempdir().expect("Failed to create temp dir");
            fs::write(other.path().join("feature_map.csv"),
                "label,code\nColor,color\nBody size (body_size),body_size\n").expect("Failed");
            fs::write(other.path().join("color_values.csv"), "label\nRed\nBlue\n").expect("Failed");
            fs::write(other.path().join("ranges.csv"), "code,min,max\nbody_size,80,220\n").expect("Failed");
            fs::write(other.path().join("classes.csv"), "species\nSparrow\n").expect("Failed");
            fs::write(other.path().join("species_features.csv"),
                "species,color,body_size\nSparrow,True,False\n").expect("Failed");
            fs::write(other.path().join("birds_data.csv"),
                "species,color,body_size\nSparrow,Red,\n").expect("Failed");

            let legacy = KnowledgeBase::open(other.path()).expect("Failed to open");
            assert_eq!(legacy.get_range("body_size").expect("Failed"), Some((80, 220)));
            assert_eq!(
                legacy.get_setting("color").expect("Failed").enum_values().map(<[String]>::len),
                Some(2)
            );
            assert!(legacy.is_applicable("Sparrow", "color"));
            assert!(!legacy.is_applicable("Sparrow", "body_size"));
            assert_eq!(legacy.get_values("Sparrow").get("body_size"), Some(&None));
        }
    }

    describe "prune" {
        it "drops columns of removed features from both tables" {
            populate(&kb);
            kb.set_values("Sparrow", values(&[
                ("color", Some("Red".into())),
                ("size", Some(FeatureValue::Number(4))),
            ])).expect("Failed to save values");
            kb.remove_feature("Color").expect("Failed");

            let report = kb.prune().expect("Failed to prune");
            assert_eq!(report.dropped_columns, vec!["color"]);
            assert!(report.dropped_rows.is_empty());
            assert!(!kb.get_values("Sparrow").contains_key("color"));
            assert!(read(&dir.path().join("birds_data.csv")).starts_with("species,size,habitat\n"));
        }

        it "does nothing on a consistent knowledge base" {
            populate(&kb);
            assert_eq!(kb.prune().expect("Failed to prune"), PruneReport::default());
        }
    }

    describe "species_profile" {
        it "lists every registered feature in order" {
            populate(&kb);
            kb.set_values("Sparrow", values(&[
                ("color", Some("Red".into())),
                ("size", Some(FeatureValue::Number(4))),
            ])).expect("Failed to save values");

            let profile = kb.species_profile("Sparrow").expect("Failed");
            let summary: Vec<_> = profile.entries.iter()
                .map(|e| (e.code.as_str(), e.applicable, e.value.clone()))
                .collect();
            assert_eq!(summary, vec![
                ("color", true, Some(FeatureValue::Label("Red".into()))),
                ("size", true, Some(FeatureValue::Number(4))),
                ("habitat", false, None),
            ]);
        }

        it "rejects unknown species" {
            assert!(matches!(kb.species_profile("Dodo"), Err(Error::UnknownSpecies(_))));
        }
    }
}
