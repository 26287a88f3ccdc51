//! End-to-end runs of the registration pipeline against in-process doubles
//! of the external estimator and resampler.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use burn::tensor::{Shape, Tensor, TensorData};
use burn_ndarray::NdArray;
use nalgebra::{Point3, Vector3};
use regkit_core::image::{Image, ImageGeometry};
use regkit_core::spatial::{Direction3, Spacing3};
use regkit_core::transform::{compose, CompositeTransform, RigidTransform, SimilarityTransform, TransformKind};
use regkit_core::ResampleImageFilter;
use regkit_io::{
    read_nifti, read_nifti_geometry, read_nifti_header, read_rigid_transform, read_similarity_transform,
    read_transform, write_nifti, write_nifti_like, write_transform,
};
use regkit_registration::{
    ApplyTransformsRequest, ExecutionConfig, HistoryCallback, InitialPoseRequest, Interpolation, PipelineStage,
    PoseEstimator, RefinementRequest, RegistrationError, RegistrationPipeline, RegistrationRequest, Resampler,
    Result, SpacingResampleRequest, ToolStatus, TransformModel,
};
use tempfile::TempDir;

type TestBackend = NdArray<f32>;

#[derive(Debug, Clone)]
struct RefineCall {
    fixed: PathBuf,
    initial_transform: PathBuf,
    masks: Vec<Option<PathBuf>>,
}

#[derive(Debug, Clone)]
struct ApplyCall {
    input: PathBuf,
    reference: PathBuf,
    interpolation: Interpolation,
}

/// Writes fixed transforms instead of estimating them and resamples with the
/// nearest-neighbour filter from regkit-core.
struct FakeToolkit {
    initial: TransformKind,
    refined: RigidTransform,
    refine_failure: Option<String>,
    models: Mutex<Vec<TransformModel>>,
    refine_calls: Mutex<Vec<RefineCall>>,
    apply_calls: Mutex<Vec<ApplyCall>>,
}

impl FakeToolkit {
    fn new(initial: impl Into<TransformKind>, refined: RigidTransform) -> Self {
        Self {
            initial: initial.into(),
            refined,
            refine_failure: None,
            models: Mutex::new(Vec::new()),
            refine_calls: Mutex::new(Vec::new()),
            apply_calls: Mutex::new(Vec::new()),
        }
    }

    fn failing_refinement(mut self, stderr: &str) -> Self {
        self.refine_failure = Some(stderr.to_string());
        self
    }

    fn apply_calls(&self) -> Vec<ApplyCall> {
        self.apply_calls.lock().unwrap().clone()
    }

    fn refine_calls(&self) -> Vec<RefineCall> {
        self.refine_calls.lock().unwrap().clone()
    }

    fn models(&self) -> Vec<TransformModel> {
        self.models.lock().unwrap().clone()
    }

    fn total_calls(&self) -> usize {
        self.models().len() + self.refine_calls().len() + self.apply_calls().len()
    }
}

impl PoseEstimator for FakeToolkit {
    fn estimate_initial_pose(&self, request: &InitialPoseRequest<'_>, _exec: &ExecutionConfig) -> Result<PathBuf> {
        self.models.lock().unwrap().push(request.model);
        write_transform(request.output, &self.initial)?;
        Ok(request.output.to_path_buf())
    }

    fn refine(&self, request: &RefinementRequest<'_>, _exec: &ExecutionConfig) -> Result<PathBuf> {
        self.refine_calls.lock().unwrap().push(RefineCall {
            fixed: request.fixed.to_path_buf(),
            initial_transform: request.initial_transform.to_path_buf(),
            masks: request
                .stages
                .iter()
                .map(|s| s.fixed_mask.map(Path::to_path_buf))
                .collect(),
        });
        if let Some(stderr) = &self.refine_failure {
            return Err(RegistrationError::external_tool("antsRegistration", ToolStatus::Exited(1), stderr.clone()));
        }

        let mut name = request.output_prefix.as_os_str().to_owned();
        name.push("Composite.txt");
        let path = PathBuf::from(name);
        let composite = CompositeTransform::from_transforms(vec![self.refined.clone().into()]);
        write_transform(&path, &TransformKind::Composite(composite))?;
        Ok(path)
    }
}

impl Resampler for FakeToolkit {
    fn resample_by_spacing(&self, request: &SpacingResampleRequest<'_>, _exec: &ExecutionConfig) -> Result<PathBuf> {
        fs::copy(request.input, request.output).map_err(|e| RegistrationError::file_io(request.output, e))?;
        Ok(request.output.to_path_buf())
    }

    fn apply_transforms(&self, request: &ApplyTransformsRequest<'_>, _exec: &ExecutionConfig) -> Result<PathBuf> {
        self.apply_calls.lock().unwrap().push(ApplyCall {
            input: request.input.to_path_buf(),
            reference: request.reference.to_path_buf(),
            interpolation: request.interpolation,
        });

        let mut chain = CompositeTransform::new();
        for path in &request.transforms {
            chain.push(read_transform(path)?);
        }
        let device = Default::default();
        let input = read_nifti::<TestBackend, _>(request.input, &device)
            .map_err(|e| RegistrationError::file_io(request.input, e))?;
        let header = read_nifti_header(request.reference)
            .map_err(|e| RegistrationError::file_io(request.reference, e))?;
        let geometry = read_nifti_geometry(request.reference)
            .map_err(|e| RegistrationError::file_io(request.reference, e))?;

        let output = ResampleImageFilter::new(geometry, chain).apply(&input)?;
        write_nifti_like(request.output, &output, &header)
            .map_err(|e| RegistrationError::file_io(request.output, e))?;
        Ok(request.output.to_path_buf())
    }
}

const DIMS: [usize; 3] = [20, 8, 8];

fn geometry(dims: [usize; 3], origin: Point3<f64>) -> ImageGeometry<3> {
    ImageGeometry::new(dims, origin, Spacing3::new(1.0, 1.0, 1.0), Direction3::identity())
}

/// Moving intensity ramps along i from 10 to 95.5.
fn ramp(i: usize) -> f32 {
    10.0 + 4.5 * i as f32
}

fn write_image(path: &Path, geometry: &ImageGeometry<3>, value: impl Fn(usize, usize, usize) -> f32) {
    let [nx, ny, nz] = geometry.dims();
    let mut values = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                values.push(value(i, j, k));
            }
        }
    }
    let device = Default::default();
    let data = Tensor::<TestBackend, 3>::from_data(
        TensorData::new(values, Shape::new(geometry.tensor_shape())),
        &device,
    );
    write_nifti(path, &Image::from_geometry(data, geometry)).unwrap();
}

fn read_values(path: &Path) -> (ImageGeometry<3>, Vec<f32>) {
    let device = Default::default();
    let image = read_nifti::<TestBackend, _>(path, &device).unwrap();
    let values = image.data().to_data().convert::<f32>().to_vec::<f32>().unwrap();
    (image.geometry(), values)
}

struct Fixture {
    _dir: TempDir,
    moving: PathBuf,
    fixed: PathBuf,
    brainmask: PathBuf,
    output_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let grid = geometry(DIMS, Point3::origin());

        let moving = dir.path().join("sub-01_T1w.nii.gz");
        let fixed = dir.path().join("template.nii.gz");
        let brainmask = dir.path().join("template_brainmask.nii.gz");
        write_image(&moving, &grid, |i, _, _| ramp(i));
        write_image(&fixed, &grid, |i, _, _| ramp(i) * 2.0);
        write_image(&brainmask, &grid, |_, _, _| 1.0);

        let output_dir = dir.path().join("out");
        Self {
            moving,
            fixed,
            brainmask,
            output_dir,
            _dir: dir,
        }
    }

    fn request(&self) -> RegistrationRequest {
        RegistrationRequest::new(&self.moving, &self.fixed, &self.brainmask, &self.output_dir)
    }

    fn workdir(&self) -> PathBuf {
        self.output_dir.join("sub-01_T1w__template")
    }

    fn path(&self, name: &str) -> PathBuf {
        self.moving.parent().unwrap().join(name)
    }
}

fn translation(x: f64, y: f64, z: f64) -> RigidTransform {
    RigidTransform::from_translation(Vector3::new(x, y, z))
}

#[test]
fn test_known_translation_is_recovered_and_clipped() {
    let fixture = Fixture::new();
    let refined = translation(5.0, 0.0, 0.0);
    let toolkit = FakeToolkit::new(translation(4.0, 0.0, 0.0), refined.clone());
    let history = Arc::new(HistoryCallback::new());

    let output = RegistrationPipeline::new(&toolkit, &toolkit)
        .with_callback(history.clone())
        .run(&fixture.request())
        .unwrap();

    assert_eq!(output.image, fixture.output_dir.join("sub-01_T1w_reg.nii.gz"));
    assert_eq!(output.transform, fixture.output_dir.join("sub-01_T1w_reg.mat"));
    assert!(output.working_dir.is_none());
    assert!(!fixture.workdir().exists());

    assert!((output.transform_value.translation() - Vector3::new(5.0, 0.0, 0.0)).norm() < 1e-9);
    let published = read_rigid_transform(&output.transform).unwrap();
    assert!(published.approx_eq(&refined, 1e-9));

    // output(p) = moving(p + 5): voxel i holds moving voxel i + 5, and the
    // five voxels mapped outside the moving grid are raised to its minimum.
    let (grid, values) = read_values(&output.image);
    assert_eq!(grid.dims(), DIMS);
    let [nx, ny, nz] = DIMS;
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let expected = if i + 5 < nx { ramp(i + 5) } else { 10.0 };
                let actual = values[(k * ny + j) * nx + i];
                assert!((actual - expected).abs() < 1e-4, "voxel ({i}, {j}, {k}): {actual} != {expected}");
            }
        }
    }

    assert_eq!(toolkit.models(), vec![TransformModel::Rigid]);
    let refine = &toolkit.refine_calls()[0];
    assert_eq!(refine.fixed, fixture.fixed);
    assert_eq!(refine.initial_transform.file_name().unwrap(), "ai_rigid.mat");
    assert_eq!(refine.masks, vec![None, Some(fixture.brainmask.clone())]);

    let applies = toolkit.apply_calls();
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].input, fixture.moving);
    assert_eq!(applies[0].reference, fixture.fixed);
    assert_eq!(applies[0].interpolation, Interpolation::BSpline(3));

    assert_eq!(
        history.stages(),
        vec![
            PipelineStage::ResampleForInit,
            PipelineStage::InitialPoseRigid,
            PipelineStage::StagedRefinement,
            PipelineStage::FlattenComposite,
            PipelineStage::ResampleMovingImage,
            PipelineStage::ClipToInputRange,
            PipelineStage::Publish,
        ]
    );
}

#[test]
fn test_prior_transform_is_composed_and_targets_prior_image() {
    let fixture = Fixture::new();
    let target = fixture.path("atlas.nii.gz");
    let target_dims = [12, 6, 8];
    write_image(&target, &geometry(target_dims, Point3::new(2.0, 0.0, 0.0)), |_, _, _| 0.0);

    let prior = RigidTransform::from_euler_zyx([0.0, 0.0, 0.1], Vector3::new(0.0, 3.0, 0.0), Point3::new(4.0, 4.0, 4.0));
    let prior_path = fixture.path("template_to_atlas.mat");
    write_transform(&prior_path, &prior.clone().into()).unwrap();

    let refined = translation(5.0, 0.0, 0.0);
    let toolkit = FakeToolkit::new(translation(0.0, 0.0, 0.0), refined.clone());
    let request = fixture
        .request()
        .with_regmask(&fixture.brainmask)
        .with_prior(&prior_path, &target)
        .with_keep_workdir(true);

    let output = RegistrationPipeline::new(&toolkit, &toolkit).run(&request).unwrap();

    let expected = compose(&[refined, prior]).unwrap();
    assert!(output.transform_value.approx_eq(&expected, 1e-9));
    let published = read_rigid_transform(&output.transform).unwrap();
    assert!(published.approx_eq(&expected, 1e-6));

    let applies = toolkit.apply_calls();
    assert_eq!(applies.last().unwrap().reference, target);
    let (grid, _) = read_values(&output.image);
    assert_eq!(grid.dims(), target_dims);

    let refine = &toolkit.refine_calls()[0];
    assert_eq!(
        refine.masks,
        vec![Some(fixture.brainmask.clone()), Some(fixture.brainmask.clone())]
    );

    assert_eq!(output.working_dir, Some(fixture.workdir()));
    assert!(fixture.workdir().join("outputRigid.mat").exists());
    assert!(!fixture.workdir().join("combined.mat").exists());
}

#[test]
fn test_scale_fixed_rescales_fixed_inputs() {
    let fixture = Fixture::new();
    let similarity = SimilarityTransform::from_rigid(&translation(1.0, 0.0, 0.0), Vector3::new(1.25, 1.25, 1.25));
    let toolkit = FakeToolkit::new(similarity, translation(5.0, 0.0, 0.0));
    let history = Arc::new(HistoryCallback::new());
    let request = fixture.request().with_scale_fixed(true).with_keep_workdir(true);

    RegistrationPipeline::new(&toolkit, &toolkit)
        .with_callback(history.clone())
        .run(&request)
        .unwrap();

    assert_eq!(toolkit.models(), vec![TransformModel::Similarity]);

    let workdir = fixture.workdir();
    let inverse_scale = read_similarity_transform(workdir.join("ai_invscale.mat")).unwrap();
    assert!((inverse_scale.scale() - Vector3::new(0.8, 0.8, 0.8)).norm() < 1e-9);
    // (dims[1] - dims[2]) * spacing[0] = 0
    assert!((inverse_scale.center() - Point3::origin()).norm() < 1e-9);
    let rigid = read_rigid_transform(workdir.join("ai_rigid.mat")).unwrap();
    assert!(rigid.approx_eq(&translation(1.0, 0.0, 0.0), 1e-6));

    let applies = toolkit.apply_calls();
    let scaled: Vec<(PathBuf, Interpolation)> = applies[..2]
        .iter()
        .map(|call| (call.input.clone(), call.interpolation))
        .collect();
    assert_eq!(
        scaled,
        vec![
            (fixture.fixed.clone(), Interpolation::Linear),
            (fixture.brainmask.clone(), Interpolation::NearestNeighbor),
        ]
    );
    assert_eq!(applies[0].reference, fixture.fixed);

    let refine = &toolkit.refine_calls()[0];
    assert_eq!(refine.fixed, workdir.join("scaled_fixed.nii.gz"));
    assert_eq!(refine.initial_transform, workdir.join("ai_rigid.mat"));
    assert_eq!(refine.masks, vec![None, Some(workdir.join("scaled_fixed_brainmask.nii.gz"))]);

    // The final resample still targets the original fixed image.
    assert_eq!(applies.last().unwrap().reference, fixture.fixed);

    let stages = history.stages();
    assert_eq!(
        &stages[..5],
        &[
            PipelineStage::ResampleForInit,
            PipelineStage::InitialPoseSimilarity,
            PipelineStage::Decompose,
            PipelineStage::ApplyInverseScale,
            PipelineStage::StagedRefinement,
        ]
    );
}

#[test]
fn test_scale_fixed_rescales_registration_mask() {
    let fixture = Fixture::new();
    let regmask = fixture.path("template_regmask.nii.gz");
    write_image(&regmask, &geometry(DIMS, Point3::origin()), |i, _, _| if i < 15 { 1.0 } else { 0.0 });

    let similarity = SimilarityTransform::from_rigid(&translation(0.0, 0.0, 0.0), Vector3::new(1.25, 1.25, 1.25));
    let toolkit = FakeToolkit::new(similarity, translation(5.0, 0.0, 0.0));
    let request = fixture
        .request()
        .with_regmask(&regmask)
        .with_scale_fixed(true)
        .with_keep_workdir(true);

    RegistrationPipeline::new(&toolkit, &toolkit).run(&request).unwrap();

    let workdir = fixture.workdir();
    let applies = toolkit.apply_calls();
    assert_eq!(applies.len(), 4);
    let scaled: Vec<(PathBuf, PathBuf, Interpolation)> = applies[..3]
        .iter()
        .map(|call| (call.input.clone(), call.reference.clone(), call.interpolation))
        .collect();
    assert_eq!(
        scaled,
        vec![
            (fixture.fixed.clone(), fixture.fixed.clone(), Interpolation::Linear),
            (fixture.brainmask.clone(), fixture.brainmask.clone(), Interpolation::NearestNeighbor),
            (regmask.clone(), regmask.clone(), Interpolation::NearestNeighbor),
        ]
    );
    assert!(workdir.join("scaled_fixed_regmask.nii.gz").exists());

    let refine = &toolkit.refine_calls()[0];
    assert_eq!(refine.fixed, workdir.join("scaled_fixed.nii.gz"));
    assert_eq!(
        refine.masks,
        vec![
            Some(workdir.join("scaled_fixed_regmask.nii.gz")),
            Some(workdir.join("scaled_fixed_brainmask.nii.gz")),
        ]
    );
}

#[test]
fn test_blocked_transform_destination_publishes_nothing() {
    let fixture = Fixture::new();
    let toolkit = FakeToolkit::new(translation(0.0, 0.0, 0.0), translation(5.0, 0.0, 0.0));
    let history = Arc::new(HistoryCallback::new());

    // A non-empty directory where the transform should land.
    let blocked = fixture.output_dir.join("sub-01_T1w_reg.mat");
    fs::create_dir_all(blocked.join("x")).unwrap();

    let err = RegistrationPipeline::new(&toolkit, &toolkit)
        .with_callback(history.clone())
        .run(&fixture.request())
        .unwrap_err();

    match err {
        RegistrationError::FileIo { path, .. } => assert_eq!(path, blocked),
        other => panic!("unexpected error: {other}"),
    }

    assert!(!fixture.output_dir.join("sub-01_T1w_reg.nii.gz").exists());
    assert!(blocked.is_dir());
    let leftovers: Vec<_> = fs::read_dir(&fixture.output_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .filter(|name| name.to_string_lossy().ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty(), "staged files left behind: {leftovers:?}");

    // The failed run keeps its artifacts for inspection.
    assert!(fixture.workdir().join("output.nii.gz").exists());
    assert!(fixture.workdir().join("outputRigid.mat").exists());
    assert_eq!(history.errors().len(), 1);
}

#[test]
fn test_external_failure_keeps_workdir_and_publishes_nothing() {
    let fixture = Fixture::new();
    let toolkit = FakeToolkit::new(translation(0.0, 0.0, 0.0), translation(5.0, 0.0, 0.0))
        .failing_refinement("Exception caught: metric failed");
    let history = Arc::new(HistoryCallback::new());

    let err = RegistrationPipeline::new(&toolkit, &toolkit)
        .with_callback(history.clone())
        .run(&fixture.request())
        .unwrap_err();

    match err {
        RegistrationError::ExternalTool { tool, status, stderr } => {
            assert_eq!(tool, "antsRegistration");
            assert_eq!(status, ToolStatus::Exited(1));
            assert_eq!(stderr, "Exception caught: metric failed");
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(fixture.workdir().join("ai_rigid.mat").exists());
    assert!(!fixture.output_dir.join("sub-01_T1w_reg.nii.gz").exists());
    assert!(!fixture.output_dir.join("sub-01_T1w_reg.mat").exists());
    assert!(toolkit.apply_calls().is_empty());
    assert_eq!(history.errors().len(), 1);
}

#[test]
fn test_configuration_errors_precede_external_calls() {
    let fixture = Fixture::new();
    let toolkit = FakeToolkit::new(translation(0.0, 0.0, 0.0), translation(0.0, 0.0, 0.0));
    let pipeline = RegistrationPipeline::new(&toolkit, &toolkit);

    let missing_target = fixture
        .request()
        .with_prior(fixture.path("prior.mat"), &fixture.fixed);
    let err = pipeline.run(&missing_target).unwrap_err();
    assert!(matches!(err, RegistrationError::Configuration(_)));
    assert!(err.to_string().contains("prior.mat does not exist."));

    let missing_moving = RegistrationRequest::new(
        fixture.path("absent.nii.gz"),
        &fixture.fixed,
        &fixture.brainmask,
        &fixture.output_dir,
    );
    assert!(matches!(
        pipeline.run(&missing_moving).unwrap_err(),
        RegistrationError::Configuration(_)
    ));

    let bad_threads = RegistrationPipeline::new(&toolkit, &toolkit).with_execution(ExecutionConfig::with_threads(0));
    assert!(matches!(
        bad_threads.run(&fixture.request()).unwrap_err(),
        RegistrationError::Configuration(_)
    ));

    assert_eq!(toolkit.total_calls(), 0);
    assert!(!fixture.output_dir.exists());
}
