//! Turn grid records into axis-aligned variables and merge them.
//!
//! Records are sorted by `(name, layer, forecast, level)`, stacked along
//! the level axis per forecast hour, then concatenated along the forecast
//! axis. Level axes that differ between forecast hours are unioned with NaN
//! fill. Variables are finally merged with inner-join semantics on every
//! shared axis.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::{s, Array2, Array4, Axis};
use tracing::{debug, info, warn};

use crate::dataset::{Dataset, LevelAxis, Variable};
use crate::decode::{GridRecord, LatLonGrid};
use crate::error::{NamError, Result};
use crate::projector::{PlanarAxes, Projector};

/// Assemble `records` of the run at `reftime` into one dataset.
pub fn reassemble(
    records: Vec<GridRecord>,
    reftime: DateTime<Utc>,
    projector: &mut Projector,
) -> Result<Dataset> {
    let parts = build_variables(records, reftime, projector)?;
    merge(parts, reftime, projector)
}

/// One variable together with the grid its y/x axes came from.
struct Part {
    variable: Variable,
    grid: Arc<LatLonGrid>,
}

/// The levels of one variable at one forecast hour.
struct Stack {
    forecast: u32,
    levels: Vec<f64>,
    planes: Vec<Array2<f32>>,
}

/// Records of one variable in sorted order.
struct Group {
    name: String,
    feature: String,
    layer: String,
    long_name: String,
    units: String,
    level_units: String,
    grid: Arc<LatLonGrid>,
    axes: Arc<PlanarAxes>,
    stacks: Vec<Stack>,
}

impl Group {
    fn new(name: String, record: &GridRecord, axes: Arc<PlanarAxes>) -> Self {
        Self {
            name,
            feature: record.feature.clone(),
            layer: record.layer.tag(),
            long_name: record.long_name.clone(),
            units: record.units.clone(),
            level_units: record.level_units.clone(),
            grid: Arc::clone(&record.grid),
            axes,
            stacks: Vec::new(),
        }
    }

    fn push(&mut self, record: GridRecord, axes: Arc<PlanarAxes>) -> Result<()> {
        if !Arc::ptr_eq(&axes, &self.axes) && *axes != *self.axes {
            return Err(NamError::grid_mismatch(
                &self.name,
                format!(
                    "forecast {} level {} lies on a different y/x grid",
                    record.forecast, record.level
                ),
            ));
        }
        let expected = (self.axes.y.len(), self.axes.x.len());
        if record.values.dim() != expected {
            return Err(NamError::grid_mismatch(
                &self.name,
                format!("values {:?} vs axes {:?}", record.values.dim(), expected),
            ));
        }

        match self.stacks.last_mut() {
            Some(stack) if stack.forecast == record.forecast => {
                if stack.levels.last() == Some(&record.level) {
                    warn!(
                        name = %self.name,
                        forecast = record.forecast,
                        level = record.level,
                        "Duplicate grid record, keeping the first"
                    );
                    return Ok(());
                }
                stack.levels.push(record.level);
                stack.planes.push(record.values);
            }
            _ => self.stacks.push(Stack {
                forecast: record.forecast,
                levels: vec![record.level],
                planes: vec![record.values],
            }),
        }
        Ok(())
    }

    fn finish(self) -> Part {
        let forecast: Vec<u32> = self.stacks.iter().map(|s| s.forecast).collect();
        let levels = union_sorted(self.stacks.iter().flat_map(|s| s.levels.iter().copied()));
        let (ny, nx) = (self.axes.y.len(), self.axes.x.len());

        let mut data = Array4::from_elem((forecast.len(), levels.len(), ny, nx), f32::NAN);
        for (f, stack) in self.stacks.iter().enumerate() {
            for (level, plane) in stack.levels.iter().zip(&stack.planes) {
                if let Some(l) = levels.iter().position(|v| v == level) {
                    data.slice_mut(s![f, l, .., ..]).assign(plane);
                }
            }
        }

        debug!(
            name = %self.name,
            forecasts = forecast.len(),
            levels = levels.len(),
            "Assembled variable"
        );

        Part {
            variable: Variable {
                name: self.name,
                feature: self.feature,
                layer: self.layer,
                long_name: self.long_name,
                units: self.units,
                forecast,
                levels: LevelAxis {
                    values: levels,
                    units: self.level_units,
                },
                y: self.axes.y.clone(),
                x: self.axes.x.clone(),
                data,
            },
            grid: self.grid,
        }
    }
}

fn build_variables(
    records: Vec<GridRecord>,
    reftime: DateTime<Utc>,
    projector: &mut Projector,
) -> Result<Vec<Part>> {
    let mut keyed: Vec<(String, String, GridRecord)> = records
        .into_iter()
        .map(|r| (r.name(), r.layer.tag(), r))
        .collect();
    keyed.sort_by(|(an, al, a), (bn, bl, b)| {
        an.cmp(bn)
            .then_with(|| al.cmp(bl))
            .then_with(|| a.forecast.cmp(&b.forecast))
            .then_with(|| a.level.total_cmp(&b.level))
    });

    let mut parts = Vec::new();
    let mut current: Option<Group> = None;

    for (name, _, record) in keyed {
        if record.reftime != reftime {
            return Err(NamError::grid_mismatch(
                name,
                format!(
                    "reference time {} differs from requested {}",
                    record.reftime, reftime
                ),
            ));
        }
        let axes = projector.axes(&record.grid);

        let group = match current.take() {
            Some(group) if group.name == name => group,
            previous => {
                if let Some(done) = previous {
                    parts.push(done.finish());
                }
                Group::new(name, &record, Arc::clone(&axes))
            }
        };
        let group = current.insert(group);
        group.push(record, axes)?;
    }
    if let Some(done) = current {
        parts.push(done.finish());
    }
    Ok(parts)
}

fn merge(parts: Vec<Part>, reftime: DateTime<Utc>, projector: &Projector) -> Result<Dataset> {
    let first = parts.first().ok_or(NamError::Empty)?;

    let forecast = intersect(parts.iter().map(|p| p.variable.forecast.as_slice()));
    let y = intersect(parts.iter().map(|p| p.variable.y.as_slice()));
    let x = intersect(parts.iter().map(|p| p.variable.x.as_slice()));

    let mut by_layer: BTreeMap<&str, Vec<&Variable>> = BTreeMap::new();
    for part in &parts {
        by_layer
            .entry(part.variable.layer.as_str())
            .or_default()
            .push(&part.variable);
    }
    let levels: BTreeMap<String, LevelAxis> = by_layer
        .into_iter()
        .map(|(layer, vars)| {
            let values = intersect(vars.iter().map(|v| v.levels.values.as_slice()));
            let units = vars[0].levels.units.clone();
            (layer.to_string(), LevelAxis { values, units })
        })
        .collect();

    let rows = positions(&first.variable.y, &y);
    let cols = positions(&first.variable.x, &x);
    let lat = first.grid.lat.select(Axis(0), &rows).select(Axis(1), &cols);
    let lon = first.grid.lon.select(Axis(0), &rows).select(Axis(1), &cols);

    let mut variables = BTreeMap::new();
    for Part { mut variable, .. } in parts {
        let axis = &levels[&variable.layer];
        let f = positions(&variable.forecast, &forecast);
        let l = positions(&variable.levels.values, &axis.values);
        let r = positions(&variable.y, &y);
        let c = positions(&variable.x, &x);

        variable.data = variable
            .data
            .select(Axis(0), &f)
            .select(Axis(1), &l)
            .select(Axis(2), &r)
            .select(Axis(3), &c);
        variable.forecast = forecast.clone();
        variable.levels = axis.clone();
        variable.y = y.clone();
        variable.x = x.clone();
        variables.insert(variable.name.clone(), variable);
    }

    info!(
        variables = variables.len(),
        forecasts = forecast.len(),
        ny = y.len(),
        nx = x.len(),
        "Merged dataset"
    );

    Ok(Dataset {
        reftime,
        forecast,
        levels,
        y,
        x,
        lat,
        lon,
        projection: projector.config().clone(),
        variables,
    })
}

/// Sorted union of `values`, duplicates removed.
fn union_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut all: Vec<f64> = values.collect();
    all.sort_by(f64::total_cmp);
    all.dedup();
    all
}

/// Values of the first axis present in every axis, in first-axis order.
fn intersect<'a, T, I>(mut axes: I) -> Vec<T>
where
    T: PartialEq + Copy + 'a,
    I: Iterator<Item = &'a [T]> + Clone,
{
    let Some(first) = axes.next() else {
        return Vec::new();
    };
    first
        .iter()
        .copied()
        .filter(|v| axes.clone().all(|axis| axis.contains(v)))
        .collect()
}

/// Index in `axis` of every value of `keep`.
fn positions<T: PartialEq>(axis: &[T], keep: &[T]) -> Vec<usize> {
    keep.iter()
        .filter_map(|k| axis.iter().position(|v| v == k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectionConfig;
    use crate::decode::LayerType;
    use chrono::TimeZone;

    fn reftime() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 3, 1, 12, 0, 0).unwrap()
    }

    fn grid(n: usize, lat0: f64) -> Arc<LatLonGrid> {
        Arc::new(LatLonGrid {
            lat: Array2::from_shape_fn((n, n), |(j, _)| lat0 + 0.1 * j as f64),
            lon: Array2::from_shape_fn((n, n), |(_, i)| -84.0 + 0.1 * i as f64),
        })
    }

    fn record(
        feature: &str,
        layer: LayerType,
        level: f64,
        forecast: u32,
        grid: &Arc<LatLonGrid>,
        value: f32,
    ) -> GridRecord {
        GridRecord {
            feature: feature.to_string(),
            layer,
            level,
            level_units: "hPa".to_string(),
            reftime: reftime(),
            forecast,
            grid: Arc::clone(grid),
            values: Array2::from_elem(grid.shape(), value),
            long_name: feature.to_uppercase(),
            units: "K".to_string(),
        }
    }

    fn isobaric() -> LayerType {
        LayerType::Known("isobaricInhPa".to_string())
    }

    fn projector() -> Projector {
        Projector::new(&ProjectionConfig::default()).unwrap()
    }

    fn same(a: &Dataset, b: &Dataset) -> bool {
        a.forecast == b.forecast
            && a.levels == b.levels
            && a.y == b.y
            && a.x == b.x
            && a.variables.len() == b.variables.len()
            && a.variables.iter().zip(&b.variables).all(|((an, av), (bn, bv))| {
                an == bn
                    && av.data.shape() == bv.data.shape()
                    && av
                        .data
                        .iter()
                        .zip(bv.data.iter())
                        .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
            })
    }

    #[test]
    fn test_level_axis_is_union_across_forecasts() {
        let g = grid(3, 32.0);
        let records = vec![
            record("t", isobaric(), 500.0, 0, &g, 1.0),
            record("t", isobaric(), 850.0, 0, &g, 2.0),
            record("t", isobaric(), 700.0, 1, &g, 3.0),
        ];

        let ds = reassemble(records, reftime(), &mut projector()).unwrap();
        let t = ds.variable("t_isobaricInhPa").unwrap();

        assert_eq!(ds.forecast, vec![0, 1]);
        assert_eq!(t.levels.values, vec![500.0, 700.0, 850.0]);
        assert_eq!(ds.levels["isobaricInhPa"].values, vec![500.0, 700.0, 850.0]);
        assert_eq!(t.shape(), (2, 3, 3, 3));
        assert_eq!(t.data[[0, 0, 1, 1]], 1.0);
        assert!(t.data[[0, 1, 1, 1]].is_nan());
        assert_eq!(t.data[[0, 2, 1, 1]], 2.0);
        assert_eq!(t.data[[1, 1, 0, 0]], 3.0);
        assert!(t.data[[1, 0, 0, 0]].is_nan());
    }

    #[test]
    fn test_stable_under_permutation() {
        let g = grid(4, 32.0);
        let records = vec![
            record("t", isobaric(), 500.0, 0, &g, 1.0),
            record("t", isobaric(), 850.0, 1, &g, 2.0),
            record("r", isobaric(), 500.0, 0, &g, 3.0),
            record("r", isobaric(), 500.0, 1, &g, 4.0),
            record("tcc", LayerType::Synthesized(214), 0.0, 0, &g, 5.0),
            record("tcc", LayerType::Synthesized(214), 0.0, 1, &g, 6.0),
        ];
        let mut reversed = records.clone();
        reversed.reverse();
        let mut rotated = records.clone();
        rotated.rotate_left(2);

        let expected = reassemble(records, reftime(), &mut projector()).unwrap();
        for permuted in [reversed, rotated] {
            let ds = reassemble(permuted, reftime(), &mut projector()).unwrap();
            assert!(same(&expected, &ds));
        }
        assert!(expected.variable("tcc_z214").is_some());
    }

    #[test]
    fn test_inner_join_on_forecast() {
        let g = grid(3, 32.0);
        let mut records = Vec::new();
        for f in [1, 2, 3] {
            records.push(record("t", isobaric(), 500.0, f, &g, f as f32));
        }
        for f in [2, 3, 4] {
            records.push(record(
                "dswrf",
                LayerType::Known("surface".into()),
                0.0,
                f,
                &g,
                10.0 * f as f32,
            ));
        }

        let ds = reassemble(records, reftime(), &mut projector()).unwrap();
        assert_eq!(ds.forecast, vec![2, 3]);
        let t = ds.variable("t_isobaricInhPa").unwrap();
        let dswrf = ds.variable("dswrf_surface").unwrap();
        assert_eq!(t.forecast, vec![2, 3]);
        assert_eq!(t.data[[0, 0, 0, 0]], 2.0);
        assert_eq!(dswrf.data[[1, 0, 0, 0]], 30.0);
    }

    #[test]
    fn test_shared_level_axis_is_intersected() {
        let g = grid(3, 32.0);
        let records = vec![
            record("t", isobaric(), 500.0, 0, &g, 1.0),
            record("t", isobaric(), 850.0, 0, &g, 2.0),
            record("r", isobaric(), 850.0, 0, &g, 3.0),
            record("2r", LayerType::Known("heightAboveGround".into()), 2.0, 0, &g, 4.0),
        ];

        let ds = reassemble(records, reftime(), &mut projector()).unwrap();
        assert_eq!(ds.levels["isobaricInhPa"].values, vec![850.0]);
        assert_eq!(ds.levels["heightAboveGround"].values, vec![2.0]);
        let t = ds.variable("t_isobaricInhPa").unwrap();
        assert_eq!(t.shape(), (1, 1, 3, 3));
        assert_eq!(t.data[[0, 0, 0, 0]], 2.0);
    }

    #[test]
    fn test_duplicates_keep_first() {
        let g = grid(2, 32.0);
        let records = vec![
            record("t", isobaric(), 500.0, 0, &g, 1.0),
            record("t", isobaric(), 500.0, 0, &g, 9.0),
        ];
        let ds = reassemble(records, reftime(), &mut projector()).unwrap();
        let t = ds.variable("t_isobaricInhPa").unwrap();
        assert_eq!(t.shape(), (1, 1, 2, 2));
        assert_eq!(t.data[[0, 0, 0, 0]], 1.0);
    }

    #[test]
    fn test_grid_mismatch_within_variable() {
        let records = vec![
            record("t", isobaric(), 500.0, 0, &grid(3, 32.0), 1.0),
            record("t", isobaric(), 500.0, 1, &grid(3, 35.0), 1.0),
        ];
        assert!(matches!(
            reassemble(records, reftime(), &mut projector()),
            Err(NamError::GridMismatch { .. })
        ));
    }

    #[test]
    fn test_lat_lon_follow_surviving_cells() {
        let g = grid(3, 32.0);
        let records = vec![record("t", isobaric(), 500.0, 0, &g, 1.0)];
        let ds = reassemble(records, reftime(), &mut projector()).unwrap();
        assert_eq!(ds.lat, g.lat);
        assert_eq!(ds.lon, g.lon);
        assert_eq!(ds.y.len(), 3);
        assert_eq!(ds.projection, ProjectionConfig::default());
    }

    #[test]
    fn test_empty_and_foreign_records() {
        assert!(matches!(
            reassemble(Vec::new(), reftime(), &mut projector()),
            Err(NamError::Empty)
        ));

        let mut stale = record("t", isobaric(), 500.0, 0, &grid(2, 32.0), 1.0);
        stale.reftime = reftime() - chrono::Duration::hours(6);
        assert!(reassemble(vec![stale], reftime(), &mut projector()).is_err());
    }
}
