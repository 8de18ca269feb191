//! End-to-end scene-graph synchronization scenarios against the host engine.

use pathlight::{
    Error, HostEngine, MaterialGraph, ParentRef, RgbSpectrum, Scene, ShaderNodeGraph,
    SpectrumInput, StaticTransform, SurfaceMaterialData, SurfaceMaterialHandle, Vec3, Vertex,
};

struct Fixture {
    engine: HostEngine,
    nodes: ShaderNodeGraph,
    materials: MaterialGraph,
    scene: Scene,
}

fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let mut engine = HostEngine::new();
    let nodes = ShaderNodeGraph::new(&mut engine, 64).unwrap();
    let materials = MaterialGraph::new(&mut engine, 64).unwrap();
    let scene = Scene::new(&mut engine, StaticTransform::identity());
    Fixture {
        engine,
        nodes,
        materials,
        scene,
    }
}

fn matte(f: &mut Fixture, gray: f32) -> SurfaceMaterialHandle {
    f.materials
        .create(
            &mut f.engine,
            &f.nodes,
            SurfaceMaterialData::Matte {
                albedo: SpectrumInput::Immediate(RgbSpectrum::gray(gray)),
            },
        )
        .unwrap()
}

fn unit_quad() -> (Vec<Vertex>, Vec<u32>) {
    let position = |x: f32, y: f32| Vertex {
        position: Vec3(x, y, 0.0),
        normal: Vec3(0.0, 0.0, 1.0),
        tangent: Vec3(1.0, 0.0, 0.0),
        ..Default::default()
    };
    let vertices = vec![
        position(0.0, 0.0),
        position(1.0, 0.0),
        position(1.0, 1.0),
        position(0.0, 1.0),
    ];
    let indices = vec![0, 1, 2, 0, 2, 3];
    (vertices, indices)
}

fn world_of(scene: &Scene, path: &str) -> StaticTransform {
    scene
        .resolved_paths()
        .into_iter()
        .find(|(p, _)| p == path)
        .map(|(_, w)| w)
        .unwrap_or_else(|| panic!("no resolved path named {path}"))
}

#[test]
fn geometry_inclusion_tie_break() {
    let mut f = fixture();
    let a = f
        .scene
        .create_internal_node(&mut f.engine, "A", StaticTransform::translate(Vec3(1.0, 0.0, 0.0)))
        .unwrap();
    let b = f
        .scene
        .create_internal_node(&mut f.engine, "B", StaticTransform::translate(Vec3(0.0, 2.0, 0.0)))
        .unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Node(a), b).unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Root, a).unwrap();

    // a purely structural chain never reaches the accelerator
    assert_eq!(f.scene.num_included_transforms(), 0);
    assert!(f.engine.group_children(f.scene.top_group()).is_empty());

    let s = f.scene.create_surface_node("S");
    let material = matte(&mut f, 0.5);
    let (vertices, indices) = unit_quad();
    f.scene.set_vertices(&mut f.engine, s, &vertices).unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Node(b), s).unwrap();
    f.scene
        .add_material_group(&mut f.engine, &f.materials, s, &indices, material)
        .unwrap();

    // exactly the top-level transform of the chain is included, once
    assert_eq!(f.scene.num_included_transforms(), 1);
    assert_eq!(f.engine.group_children(f.scene.top_group()).len(), 1);
    assert_eq!(f.scene.included_paths(), vec!["Root-A-B".to_string()]);

    // its cached world matrix composes the whole chain
    let world = world_of(&f.scene, "Root-A-B");
    assert_eq!(world.apply_point(Vec3(0.0, 0.0, 0.0)), Vec3(1.0, 2.0, 0.0));
}

#[test]
fn instancing_fans_out_per_parent_path() {
    let mut f = fixture();
    let s = f.scene.create_surface_node("S");
    let m0 = matte(&mut f, 0.2);
    let m1 = matte(&mut f, 0.8);
    let (vertices, indices) = unit_quad();
    f.scene.set_vertices(&mut f.engine, s, &vertices).unwrap();
    f.scene
        .add_material_group(&mut f.engine, &f.materials, s, &indices, m0)
        .unwrap();
    f.scene
        .add_material_group(&mut f.engine, &f.materials, s, &indices, m1)
        .unwrap();

    let a = f
        .scene
        .create_internal_node(&mut f.engine, "A", StaticTransform::translate(Vec3(5.0, 0.0, 0.0)))
        .unwrap();
    let b = f
        .scene
        .create_internal_node(&mut f.engine, "B", StaticTransform::translate(Vec3(0.0, 7.0, 0.0)))
        .unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Node(a), s).unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Node(b), s).unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Root, a).unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Root, b).unwrap();

    // two independent geometry-bearing paths
    assert_eq!(f.scene.num_included_transforms(), 2);
    assert_eq!(f.engine.group_children(f.scene.top_group()).len(), 2);
    let mut included = f.scene.included_paths();
    included.sort();
    assert_eq!(included, vec!["Root-A".to_string(), "Root-B".to_string()]);

    // with distinct world matrices
    let origin = Vec3(0.0, 0.0, 0.0);
    assert_eq!(world_of(&f.scene, "Root-A").apply_point(origin), Vec3(5.0, 0.0, 0.0));
    assert_eq!(world_of(&f.scene, "Root-B").apply_point(origin), Vec3(0.0, 7.0, 0.0));

    // both paths reference the same engine geometry: buffers are shared,
    // never copied per instance
    let groups = f.scene.material_groups(s).unwrap();
    assert_eq!(groups.len(), 2);
    let g0 = f.engine.geometry(groups[0].geometry());
    let g1 = f.engine.geometry(groups[1].geometry());
    assert_eq!(g0.vertex_buffer, g1.vertex_buffer);
    assert_ne!(g0.index_buffer, g1.index_buffer);
    assert_ne!(g0.material_index, g1.material_index);
}

#[test]
fn transform_update_recomputes_only_affected_paths() {
    let mut f = fixture();
    let a = f
        .scene
        .create_internal_node(&mut f.engine, "A", StaticTransform::translate(Vec3(1.0, 0.0, 0.0)))
        .unwrap();
    let b = f
        .scene
        .create_internal_node(&mut f.engine, "B", StaticTransform::translate(Vec3(0.0, 2.0, 0.0)))
        .unwrap();
    let c = f
        .scene
        .create_internal_node(&mut f.engine, "C", StaticTransform::translate(Vec3(0.0, 0.0, 3.0)))
        .unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Node(a), b).unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Root, a).unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Root, c).unwrap();

    let s0 = f.scene.create_surface_node("S0");
    let s1 = f.scene.create_surface_node("S1");
    let material = matte(&mut f, 0.5);
    let (vertices, indices) = unit_quad();
    for (surface, parent) in [(s0, b), (s1, c)] {
        f.scene.set_vertices(&mut f.engine, surface, &vertices).unwrap();
        f.scene
            .add_child(&mut f.engine, ParentRef::Node(parent), surface)
            .unwrap();
        f.scene
            .add_material_group(&mut f.engine, &f.materials, surface, &indices, material)
            .unwrap();
    }

    let c_world_before = world_of(&f.scene, "Root-C");

    f.scene
        .set_transform(&mut f.engine, a, StaticTransform::translate(Vec3(10.0, 0.0, 0.0)))
        .unwrap();

    // every path through A reflects the new composition
    let origin = Vec3(0.0, 0.0, 0.0);
    assert_eq!(
        world_of(&f.scene, "Root-A-B").apply_point(origin),
        Vec3(10.0, 2.0, 0.0)
    );
    assert_eq!(world_of(&f.scene, "Root-A").apply_point(origin), Vec3(10.0, 0.0, 0.0));

    // paths not through A are bit-identical to before
    assert_eq!(world_of(&f.scene, "Root-C"), c_world_before);
}

#[test]
fn accel_is_dirtied_only_on_inclusion_flips() {
    let mut f = fixture();
    let a = f
        .scene
        .create_internal_node(&mut f.engine, "A", StaticTransform::identity())
        .unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Root, a).unwrap();

    let s = f.scene.create_surface_node("S");
    let material = matte(&mut f, 0.5);
    let (vertices, indices) = unit_quad();
    f.scene.set_vertices(&mut f.engine, s, &vertices).unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Node(a), s).unwrap();
    f.scene
        .add_material_group(&mut f.engine, &f.materials, s, &indices, material)
        .unwrap();

    let top = f.scene.top_group();
    assert!(f.engine.is_dirty(top));
    f.engine.clear_dirty(top);

    // a second group on an already-included path never touches the top group
    f.scene
        .add_material_group(&mut f.engine, &f.materials, s, &indices, material)
        .unwrap();
    assert!(!f.engine.is_dirty(top));
    assert_eq!(f.scene.num_included_transforms(), 1);

    // removing all geometry flips inclusion off and dirties it again
    f.scene.remove_child(&mut f.engine, ParentRef::Node(a), s).unwrap();
    assert!(f.engine.is_dirty(top));
    assert_eq!(f.scene.num_included_transforms(), 0);
    assert!(f.engine.group_children(top).is_empty());
}

#[test]
fn environment_accepts_only_environment_emitters() {
    let mut f = fixture();
    let surface = matte(&mut f, 0.5);
    assert!(matches!(
        f.scene.set_environment(&f.materials, Some(surface)),
        Err(Error::WrongNodeKind { .. })
    ));
    assert_eq!(f.scene.environment(), None);

    let env = f
        .materials
        .create(
            &mut f.engine,
            &f.nodes,
            SurfaceMaterialData::EnvironmentEmitter {
                emittance: SpectrumInput::Immediate(RgbSpectrum::gray(1.0)),
                scale: 1.0,
            },
        )
        .unwrap();
    f.scene.set_environment(&f.materials, Some(env)).unwrap();
    assert_eq!(f.scene.environment(), Some(env));
    assert_eq!(
        f.scene.environment_slot(),
        Some(f.materials.get(env).unwrap().slot())
    );

    f.scene.set_environment(&f.materials, None).unwrap();
    assert_eq!(f.scene.environment(), None);
}

#[test]
fn removing_one_instance_path_preserves_the_other() {
    let mut f = fixture();
    let s = f.scene.create_surface_node("S");
    let material = matte(&mut f, 0.5);
    let (vertices, indices) = unit_quad();
    f.scene.set_vertices(&mut f.engine, s, &vertices).unwrap();
    f.scene
        .add_material_group(&mut f.engine, &f.materials, s, &indices, material)
        .unwrap();

    let a = f
        .scene
        .create_internal_node(&mut f.engine, "A", StaticTransform::identity())
        .unwrap();
    let b = f
        .scene
        .create_internal_node(&mut f.engine, "B", StaticTransform::identity())
        .unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Node(a), s).unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Node(b), s).unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Root, a).unwrap();
    f.scene.add_child(&mut f.engine, ParentRef::Root, b).unwrap();
    assert_eq!(f.scene.num_included_transforms(), 2);

    f.scene.remove_child(&mut f.engine, ParentRef::Root, a).unwrap();

    assert_eq!(f.scene.num_included_transforms(), 1);
    assert_eq!(f.scene.included_paths(), vec!["Root-B".to_string()]);
    assert_eq!(f.engine.group_children(f.scene.top_group()).len(), 1);
}
