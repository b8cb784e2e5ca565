use clap::{App, Arg};
use rand::rngs::OsRng;
use telehash_switch::identity::Identity;
use telehash_switch::storage::{FileStorage, Storage};

fn main() {
    let matches = App::new("Identity Generator")
        .version("1.0")
        .about("Generates an RSA node identity and prints its hashname.")
        .arg(
            Arg::with_name("DIR")
                .help("Directory the identity files are written to")
                .required(true),
        )
        .arg(
            Arg::with_name("NAME")
                .help("Base name for the identity files")
                .required(true),
        )
        .get_matches();

    let dir = matches.value_of("DIR").unwrap();
    let name = matches.value_of("NAME").unwrap();

    let storage = FileStorage::new(dir);

    if let Ok(existing) = storage.read_identity(name) {
        println!("Identity `{}` already exists", name);
        println!("hashname: {}", existing.hashname());
        return;
    }

    println!("Generating 2048 bit RSA identity, this can take a moment...");

    let mut rng = OsRng;
    let identity = Identity::generate(&mut rng).expect("Identity generation failed");

    storage
        .write_identity(&identity, name)
        .expect("Failed writing identity files");

    println!("Written {}/{}.pub.der and {}/{}.key.der", dir, name, dir, name);
    println!("hashname: {}", identity.hashname());
}
