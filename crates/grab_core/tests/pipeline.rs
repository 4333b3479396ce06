mod common;

use approx::assert_abs_diff_eq;
use common::{Fixture, BODY_VERTS, HAND_VERTS};
use grab_core::{
    codec::sequence::SequenceRecord,
    common::{
        config::OutputOptions,
        error::GrabError,
        landmarks::SemanticIndexTable,
        template::TemplateMesh,
        types::{Actor, OutputKind},
    },
    models::{
        adapter::DeformationAdapter,
        assets::{ModelAssets, ModelCache},
        context::ExecutionContext,
    },
    pipeline::{
        batch::BatchDriver,
        selector::{KindState, OutputWriter},
    },
};
use grab_utils::{
    io::{NpyArray, NpzArchive},
    numerical::batch_rodrigues,
};
use ndarray as nd;

#[test]
fn body_and_contact_produce_exactly_two_files() {
    let fx = Fixture::new();
    fx.add(&fx.record("s1", "apple_eat_1", 3));
    let config = fx.config(OutputOptions::only(&[OutputKind::BodyVerts, OutputKind::Contact]));

    let summary = BatchDriver::new(config).unwrap().show_progress(false).run().unwrap();
    assert_eq!(summary.sequences, 1);
    assert_eq!(summary.written, 2);
    assert_eq!(fx.products(), vec!["s1/apple_eat_1_contact_info.npz", "s1/apple_eat_1_verts_body.npz"]);

    let mut contact = NpzArchive::open(&fx.out_path.join("s1/apple_eat_1_contact_info.npz")).unwrap();
    assert_eq!(contact.read_raw("object_contact_mask").unwrap(), NpyArray::Bool(nd::arr1(&[false, true, false]).into_dyn()));
    assert!(matches!(contact.read_raw("object_contact").unwrap(), NpyArray::I8(_)));

    let mut body = NpzArchive::open(&fx.out_path.join("s1/apple_eat_1_verts_body.npz")).unwrap();
    let verts: nd::Array3<f32> = body.read_f32("verts_body").unwrap();
    assert_eq!(verts.dim(), (3, BODY_VERTS, 3));
    assert!(fx.out_path.join("grab_vertices_cfg.toml").is_file());
}

#[test]
fn rerun_is_idempotent_and_force_recomputes() {
    let fx = Fixture::new();
    fx.add(&fx.record("s1", "apple_eat_1", 4));
    fx.add(&fx.record("s2", "apple_pass_1", 2));
    let mut options = OutputOptions::only(&[OutputKind::Metadata, OutputKind::BodyVerts, OutputKind::Contact, OutputKind::ObjectVerts]);
    options.n_verts_sample = 16;
    options.sample_seed = Some(11);

    let first = BatchDriver::new(fx.config(options.clone())).unwrap().show_progress(false).run().unwrap();
    assert_eq!(first.written, 8);
    assert_eq!(first.evaluations, 4);
    let products = fx.products();
    let bytes: Vec<Vec<u8>> = products.iter().map(|p| std::fs::read(fx.out_path.join(p)).unwrap()).collect();

    let second = BatchDriver::new(fx.config(options.clone())).unwrap().show_progress(false).run().unwrap();
    assert_eq!(second.evaluations, 0);
    assert_eq!((second.written, second.skipped), (0, 8));
    let again: Vec<Vec<u8>> = products.iter().map(|p| std::fs::read(fx.out_path.join(p)).unwrap()).collect();
    assert_eq!(bytes, again);

    options.force_reprocess = true;
    let forced = BatchDriver::new(fx.config(options)).unwrap().show_progress(false).run().unwrap();
    assert_eq!(forced.written, 8);
    assert_eq!(forced.evaluations, 4);
    // seeded draws give the same object vertices again
    let object = "s1/apple_eat_1_verts_object.npz";
    let idx = products.iter().position(|p| p == object).unwrap();
    let mut before = NpzArchive::new(std::io::Cursor::new(bytes[idx].clone())).unwrap();
    let mut after = NpzArchive::open(&fx.out_path.join(object)).unwrap();
    let before: nd::Array3<f32> = before.read_f32("verts_object").unwrap();
    let after: nd::Array3<f32> = after.read_f32("verts_object").unwrap();
    assert_eq!(before, after);
}

#[test]
fn every_kind_has_frame_leading_arrays() {
    let fx = Fixture::new();
    let record = fx.record("s1", "apple_lift", 5);
    let path = fx.add(&record);
    let mut options = OutputOptions::only(&[
        OutputKind::Metadata,
        OutputKind::BodyVerts,
        OutputKind::HandJoints,
        OutputKind::Contact,
        OutputKind::LeftHandVerts,
        OutputKind::RightHandVerts,
        OutputKind::ObjectVerts,
    ]);
    options.n_verts_sample = 16;
    let config = fx.config(options);
    let mut writer = fx.writer(&config);

    let report = writer.process(&path).unwrap();
    assert_eq!(report.written(), 7, "{:?}", report.states);
    // the body is evaluated once for body vertices and hand joints
    assert_eq!(writer.evaluations(), 4);

    for kind in [
        OutputKind::Metadata,
        OutputKind::BodyVerts,
        OutputKind::HandJoints,
        OutputKind::Contact,
        OutputKind::LeftHandVerts,
        OutputKind::RightHandVerts,
        OutputKind::ObjectVerts,
    ] {
        let mut npz = NpzArchive::open(&writer.layout().artifact_path(&path, kind)).unwrap();
        let names: Vec<String> = npz.names().map(str::to_string).collect();
        assert!(!names.is_empty());
        for name in names {
            assert_eq!(npz.read_raw(&name).unwrap().leading_dim(), 5, "{kind} {name}");
        }
    }

    let mut joints = NpzArchive::open(&writer.layout().artifact_path(&path, OutputKind::HandJoints)).unwrap();
    assert_eq!(joints.read_f32::<nd::Ix3>("lhand_joints").unwrap().dim(), (5, 16, 3));
    assert_eq!(joints.read_f32::<nd::Ix3>("rhand_tips").unwrap().dim(), (5, 5, 3));
    for (key, actor) in [("lhand_rot", Actor::LeftHand), ("rhand_rot", Actor::RightHand)] {
        let rot: nd::Array3<f32> = joints.read_f32(key).unwrap();
        let orient = &record[actor].params["global_orient"];
        assert_abs_diff_eq!(rot, batch_rodrigues(&orient.mapv(|x| -x)), epsilon = 1e-6);
    }
    let trans: nd::Array2<f32> = joints.read_f32("rhand_trans").unwrap();
    assert_eq!(trans, record[Actor::RightHand].params["transl"]);

    let mut lhand = NpzArchive::open(&writer.layout().artifact_path(&path, OutputKind::LeftHandVerts)).unwrap();
    assert_eq!(lhand.read_f32::<nd::Ix3>("verts_body").unwrap().dim(), (5, HAND_VERTS, 3));
    let mut object = NpzArchive::open(&writer.layout().artifact_path(&path, OutputKind::ObjectVerts)).unwrap();
    assert_eq!(object.read_f32::<nd::Ix3>("verts_object").unwrap().dim(), (5, 16, 3));

    let mut metadata = NpzArchive::open(&writer.layout().artifact_path(&path, OutputKind::Metadata)).unwrap();
    assert_eq!(metadata.read_raw("frame_nums").unwrap(), NpyArray::I64(nd::arr1(&[0_i64, 1, 2, 3, 4]).into_dyn()));
    let intent: nd::Array2<u8> = match metadata.read_raw("intent").unwrap() {
        NpyArray::U8(a) => a.into_dimensionality().unwrap(),
        other => panic!("unexpected intent array {other:?}"),
    };
    assert_eq!(intent.row(4).to_vec(), b"eat".to_vec());
}

#[test]
fn oversized_sample_fails_only_the_object_kind() {
    let fx = Fixture::new();
    let path = fx.add(&fx.record("s1", "apple_eat_1", 2));
    let mut options = OutputOptions::only(&[OutputKind::Contact, OutputKind::ObjectVerts]);
    options.n_verts_sample = 1000;
    let config = fx.config(options);
    let mut writer = fx.writer(&config);

    let report = writer.process(&path).unwrap();
    assert_eq!(report.state(OutputKind::Contact), Some(&KindState::Written));
    assert!(matches!(report.state(OutputKind::ObjectVerts), Some(KindState::Failed(_))));
    assert_eq!(fx.products(), vec!["s1/apple_eat_1_contact_info.npz"]);
}

#[test]
fn templates_are_reloaded_for_every_sequence() {
    let fx = Fixture::new();
    let first = fx.add(&fx.record("s1", "apple_eat_1", 2));
    let second = fx.add(&fx.record("s1", "apple_eat_2", 2));
    let mut options = OutputOptions::only(&[OutputKind::ObjectVerts]);
    options.n_verts_sample = 30;
    let config = fx.config(options);
    let mut writer = fx.writer(&config);

    let report = writer.process(&first).unwrap();
    assert_eq!(report.state(OutputKind::ObjectVerts), Some(&KindState::Written));

    // the apple shrinks below the sample count between the two sequences
    let small = TemplateMesh::new(
        nd::Array2::from_shape_fn((10, 3), |(v, c)| (v + c) as f32 * 0.1),
        nd::Array2::from_shape_fn((8, 3), |(f, k)| (f + k) as u32),
    );
    small.save_ply(&fx.dir.path().join("tools/object_meshes/apple.ply")).unwrap();
    let report = writer.process(&second).unwrap();
    assert!(matches!(report.state(OutputKind::ObjectVerts), Some(KindState::Failed(_))));
    assert_eq!(fx.products(), vec!["s1/apple_eat_1_verts_object.npz"]);
}

#[test]
fn corrupt_record_does_not_stop_the_batch() {
    let fx = Fixture::new();
    fx.add(&fx.record("s1", "apple_eat_1", 3));
    std::fs::create_dir_all(fx.grab_path.join("s1")).unwrap();
    std::fs::write(fx.grab_path.join("s1/broken.npz"), b"not an archive").unwrap();
    let config = fx.config(OutputOptions::only(&[OutputKind::Metadata, OutputKind::Contact]));

    let summary = BatchDriver::with_writer(config.clone(), fx.writer(&config)).show_progress(false).run().unwrap();
    assert_eq!(summary.sequences, 2);
    assert_eq!(summary.written, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.failed_sequences, vec!["s1/broken.npz".to_string()]);
}

#[test]
fn missing_template_fails_the_kind() {
    let fx = Fixture::new();
    let mut record = fx.record("s1", "apple_eat_1", 2);
    record.actors[Actor::Object].template = "tools/object_meshes/missing.ply".into();
    let path = fx.add(&record);
    let config = fx.config(OutputOptions::only(&[OutputKind::BodyVerts, OutputKind::ObjectVerts]));
    let mut writer = fx.writer(&config);

    let report = writer.process(&path).unwrap();
    assert_eq!(report.state(OutputKind::BodyVerts), Some(&KindState::Written));
    match report.state(OutputKind::ObjectVerts) {
        Some(KindState::Failed(reason)) => assert!(reason.contains("missing.ply")),
        other => panic!("unexpected state {other:?}"),
    }
}

#[test]
fn nothing_to_do_skips_loading() {
    let fx = Fixture::new();
    let path = fx.add(&fx.record("s1", "apple_eat_1", 2));
    let config = fx.config(OutputOptions::only(&[OutputKind::Contact]));
    let mut writer = fx.writer(&config);
    assert!(writer.process(&path).unwrap().loaded);

    // an unreadable record is never opened when its products exist
    std::fs::write(&path, b"garbage").unwrap();
    let report = writer.process(&path).unwrap();
    assert!(!report.loaded);
    assert_eq!(report.state(OutputKind::Contact), Some(&KindState::Skipped));
    assert!(SequenceRecord::load(&path).is_err());
}

#[test]
fn unknown_landmark_stops_before_any_sequence() {
    let fx = Fixture::new();
    let config = fx.config(OutputOptions::only(&[OutputKind::HandJoints]));
    let table = SemanticIndexTable::new(&["pelvis"], &[("lthumb", 0)]);
    let adapter = DeformationAdapter::new(ExecutionContext::sequential(), ModelCache::new(ModelAssets::new(&fx.model_path)));
    let err = OutputWriter::new(&config, adapter, &table).err().unwrap();
    assert!(matches!(err, GrabError::UnknownLandmark { .. }));
    assert!(err.is_fatal());
}

#[test]
fn missing_model_files_are_a_config_error() {
    let fx = Fixture::new();
    let mut config = fx.config(OutputOptions::only(&[OutputKind::BodyVerts]));
    config.model_path = fx.dir.path().join("nowhere");
    assert!(matches!(BatchDriver::new(config).err(), Some(GrabError::Config(_))));
}
