// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Units of per-frame work handed to the host scheduler.

use std::collections::HashMap;
use std::fmt;

use crate::renderer::error::RenderError;

/// A unit of work the renderer asks the host to run for a frame.
///
/// Dependencies are expressed by name. A dependency on a job that is not part of the
/// same batch is considered already satisfied.
pub trait Job: Send {
    /// Unique name within a batch.
    fn name(&self) -> &'static str;

    /// Names of the jobs that must run before this one.
    fn dependencies(&self) -> &[&'static str] {
        &[]
    }

    /// Runs the job.
    fn run(&mut self) -> Result<(), RenderError>;
}

/// Why a batch of jobs could not be ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOrderError {
    /// Two jobs share a name.
    DuplicateName(&'static str),
    /// The dependency graph contains a cycle through these jobs.
    Cycle(Vec<&'static str>),
}

impl fmt::Display for JobOrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOrderError::DuplicateName(name) => write!(f, "Duplicate job name '{name}'"),
            JobOrderError::Cycle(names) => {
                write!(f, "Job dependency cycle between: {}", names.join(", "))
            }
        }
    }
}

impl std::error::Error for JobOrderError {}

/// Sorts `jobs` so that every job comes after its dependencies.
///
/// The sort is stable: independent jobs keep their submission order.
pub fn order_jobs(jobs: Vec<Box<dyn Job>>) -> Result<Vec<Box<dyn Job>>, JobOrderError> {
    let mut index_of: HashMap<&'static str, usize> = HashMap::with_capacity(jobs.len());
    for (index, job) in jobs.iter().enumerate() {
        if index_of.insert(job.name(), index).is_some() {
            return Err(JobOrderError::DuplicateName(job.name()));
        }
    }

    let mut in_degree = vec![0usize; jobs.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); jobs.len()];
    for (index, job) in jobs.iter().enumerate() {
        for dep in job.dependencies() {
            if let Some(&dep_index) = index_of.get(dep) {
                in_degree[index] += 1;
                dependents[dep_index].push(index);
            }
        }
    }

    let mut order = Vec::with_capacity(jobs.len());
    let mut placed = vec![false; jobs.len()];
    // Always pick the lowest ready index to keep the order stable.
    while order.len() < jobs.len() {
        let Some(next) = (0..jobs.len()).find(|&i| !placed[i] && in_degree[i] == 0) else {
            let cycle = (0..jobs.len())
                .filter(|&i| !placed[i])
                .map(|i| jobs[i].name())
                .collect();
            return Err(JobOrderError::Cycle(cycle));
        };
        placed[next] = true;
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
        }
    }

    let mut slots: Vec<Option<Box<dyn Job>>> = jobs.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, Vec<&'static str>);

    impl Job for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn dependencies(&self) -> &[&'static str] {
            &self.1
        }

        fn run(&mut self) -> Result<(), RenderError> {
            Ok(())
        }
    }

    fn job(name: &'static str, deps: &[&'static str]) -> Box<dyn Job> {
        Box::new(Named(name, deps.to_vec()))
    }

    fn names(jobs: &[Box<dyn Job>]) -> Vec<&'static str> {
        jobs.iter().map(|j| j.name()).collect()
    }

    #[test]
    fn dependencies_run_first() {
        let jobs = vec![
            job("render", &["scene", "blas"]),
            job("blas", &["scene"]),
            job("scene", &[]),
        ];
        let ordered = order_jobs(jobs).unwrap();
        assert_eq!(names(&ordered), ["scene", "blas", "render"]);
    }

    #[test]
    fn independent_jobs_keep_their_order_and_missing_deps_are_ignored() {
        let jobs = vec![job("b", &["absent"]), job("a", &[]), job("c", &[])];
        let ordered = order_jobs(jobs).unwrap();
        assert_eq!(names(&ordered), ["b", "a", "c"]);
    }

    #[test]
    fn cycles_and_duplicates_are_rejected() {
        let cyclic = vec![job("x", &["y"]), job("y", &["x"]), job("z", &[])];
        assert_eq!(
            order_jobs(cyclic).err(),
            Some(JobOrderError::Cycle(vec!["x", "y"]))
        );

        let duplicated = vec![job("x", &[]), job("x", &[])];
        assert_eq!(
            order_jobs(duplicated).err(),
            Some(JobOrderError::DuplicateName("x"))
        );
    }
}
