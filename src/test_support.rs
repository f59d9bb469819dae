// Snapshot fixtures written as real NetCDF datasets

use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SnapshotFixture {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub bathymetry: Vec<f32>,
    /// Flattened `[time_steps, nodes]`
    pub elevation: Vec<f32>,
    pub time_steps: usize,
    /// 1-based, SCHISM layout with a -1 fourth corner for triangles
    pub faces: Vec<[i32; 4]>,
    /// `_FillValue` put on every float variable
    pub fill_value: Option<f32>,
}

impl SnapshotFixture {
    /// Unit square split into two triangles; bathymetry 1.0 everywhere.
    pub fn square(elevation: Vec<f32>) -> Self {
        SnapshotFixture {
            x: vec![0.0, 1.0, 1.0, 0.0],
            y: vec![0.0, 0.0, 1.0, 1.0],
            bathymetry: vec![1.0; 4],
            elevation,
            time_steps: 1,
            faces: vec![[1, 2, 3, -1], [1, 3, 4, -1]],
            fill_value: None,
        }
    }
}

pub fn write_snapshot(path: &Path, fixture: &SnapshotFixture) {
    let nodes = fixture.x.len();
    let mut file = netcdf::create(path).unwrap();
    file.add_dimension("time", fixture.time_steps).unwrap();
    file.add_dimension("nSCHISM_hgrid_node", nodes).unwrap();
    file.add_dimension("nSCHISM_hgrid_face", fixture.faces.len()).unwrap();
    file.add_dimension("nMaxSCHISM_hgrid_face_nodes", 4).unwrap();

    let floats: [(&str, &[&str], &[f32]); 4] = [
        ("SCHISM_hgrid_node_x", &["nSCHISM_hgrid_node"], &fixture.x),
        ("SCHISM_hgrid_node_y", &["nSCHISM_hgrid_node"], &fixture.y),
        ("depth", &["nSCHISM_hgrid_node"], &fixture.bathymetry),
        ("elev", &["time", "nSCHISM_hgrid_node"], &fixture.elevation),
    ];
    for (name, dims, values) in floats {
        let mut var = file.add_variable::<f32>(name, dims).unwrap();
        if let Some(fill) = fixture.fill_value {
            var.put_attribute("_FillValue", fill).unwrap();
        }
        var.put_values(values, ..).unwrap();
    }

    let flat: Vec<i32> = fixture.faces.iter().flatten().copied().collect();
    let mut var = file
        .add_variable::<i32>(
            "SCHISM_hgrid_face_nodes",
            &["nSCHISM_hgrid_face", "nMaxSCHISM_hgrid_face_nodes"],
        )
        .unwrap();
    var.put_values(&flat, ..).unwrap();
}

pub fn write_gz_snapshot(path: &Path, fixture: &SnapshotFixture) {
    let staging = path.with_extension("staging");
    write_snapshot(&staging, fixture);
    let bytes = std::fs::read(&staging).unwrap();
    std::fs::remove_file(&staging).unwrap();

    let mut encoder = GzEncoder::new(std::fs::File::create(path).unwrap(), Compression::fast());
    encoder.write_all(&bytes).unwrap();
    encoder.finish().unwrap();
}
